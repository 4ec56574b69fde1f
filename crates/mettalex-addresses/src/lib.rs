//! This crate contains the logical names of the Mettalex contracts and the
//! address record that maps each name to its deployed address. The record
//! is persisted as a JSON object so that later runs can reconnect to an
//! existing deployment instead of redeploying it.
use std::{
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
    str::FromStr,
};

use ethers::types::Address;
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};

/// The logical name of a contract in a Mettalex deployment. The serialized
/// form matches the keys of the address and argument files.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ContractName {
    BFactory,
    BPool,
    Coin,
    Long,
    Short,
    Vault,
    YController,
    YVault,
    PoolController,
}

impl ContractName {
    /// Every contract in deployment order.
    pub const ALL: [ContractName; 9] = [
        ContractName::BFactory,
        ContractName::BPool,
        ContractName::Coin,
        ContractName::Long,
        ContractName::Short,
        ContractName::Vault,
        ContractName::YController,
        ContractName::YVault,
        ContractName::PoolController,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractName::BFactory => "BFactory",
            ContractName::BPool => "BPool",
            ContractName::Coin => "Coin",
            ContractName::Long => "Long",
            ContractName::Short => "Short",
            ContractName::Vault => "Vault",
            ContractName::YController => "YController",
            ContractName::YVault => "YVault",
            ContractName::PoolController => "PoolController",
        }
    }
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractName {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        ContractName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| eyre!("unknown contract name {}", s))
    }
}

/// The deployed address of every contract, if known. A `None` entry means
/// the contract has not been deployed yet and must be deployed before it
/// can be used.
#[derive(Default, Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Addresses {
    #[serde(rename = "BFactory", default)]
    pub factory: Option<Address>,
    #[serde(rename = "BPool", default)]
    pub pool: Option<Address>,
    #[serde(rename = "Coin", default)]
    pub coin: Option<Address>,
    #[serde(rename = "Long", default)]
    pub long: Option<Address>,
    #[serde(rename = "Short", default)]
    pub short: Option<Address>,
    #[serde(rename = "Vault", default)]
    pub vault: Option<Address>,
    #[serde(rename = "YController", default)]
    pub y_controller: Option<Address>,
    #[serde(rename = "YVault", default)]
    pub y_vault: Option<Address>,
    #[serde(rename = "PoolController", default)]
    pub strategy: Option<Address>,
}

impl Addresses {
    /// Gets the recorded address of a contract.
    pub fn get(&self, name: ContractName) -> Option<Address> {
        *self.slot(name)
    }

    /// Records the address of a contract, replacing any previous entry.
    pub fn set(&mut self, name: ContractName, address: Address) {
        *self.slot_mut(name) = Some(address);
    }

    /// Returns true when every contract has a recorded address.
    pub fn is_complete(&self) -> bool {
        ContractName::ALL
            .into_iter()
            .all(|name| self.get(name).is_some())
    }

    /// Iterates over the record in deployment order.
    pub fn iter(&self) -> impl Iterator<Item = (ContractName, Option<Address>)> + '_ {
        ContractName::ALL
            .into_iter()
            .map(move |name| (name, self.get(name)))
    }

    /// Loads a record from disk. A missing file yields `None` so that the
    /// caller can decide whether that means "nothing deployed yet".
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let file =
            File::open(path).wrap_err_with(|| format!("couldn't open {}", path.display()))?;
        let addresses = serde_json::from_reader(file)
            .wrap_err_with(|| format!("couldn't parse addresses from {}", path.display()))?;
        Ok(Some(addresses))
    }

    /// Saves the record, replacing the file atomically: the JSON is written
    /// to a sibling temporary file which is then renamed over the target.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = temporary_path(path);
        fs::write(&tmp, serde_json::to_string_pretty(self)?)
            .wrap_err_with(|| format!("couldn't write {}", tmp.display()))?;
        fs::rename(&tmp, path).wrap_err_with(|| format!("couldn't replace {}", path.display()))?;
        Ok(())
    }

    fn slot(&self, name: ContractName) -> &Option<Address> {
        match name {
            ContractName::BFactory => &self.factory,
            ContractName::BPool => &self.pool,
            ContractName::Coin => &self.coin,
            ContractName::Long => &self.long,
            ContractName::Short => &self.short,
            ContractName::Vault => &self.vault,
            ContractName::YController => &self.y_controller,
            ContractName::YVault => &self.y_vault,
            ContractName::PoolController => &self.strategy,
        }
    }

    fn slot_mut(&mut self, name: ContractName) -> &mut Option<Address> {
        match name {
            ContractName::BFactory => &mut self.factory,
            ContractName::BPool => &mut self.pool,
            ContractName::Coin => &mut self.coin,
            ContractName::Long => &mut self.long,
            ContractName::Short => &mut self.short,
            ContractName::Vault => &mut self.vault,
            ContractName::YController => &mut self.y_controller,
            ContractName::YVault => &mut self.y_vault,
            ContractName::PoolController => &mut self.strategy,
        }
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
