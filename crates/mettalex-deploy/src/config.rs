//! Configuration for the deployer: process environment overrides, the
//! account file, the literal parameters of a fresh deployment and the
//! per-network constructor arguments used when reconnecting.
use std::{
    collections::BTreeMap,
    env, fmt,
    fs::File,
    path::{Path, PathBuf},
};

use ethers::{
    abi::{
        token::{LenientTokenizer, Tokenizer},
        ParamType, Token,
    },
    types::U256,
};
use eyre::{eyre, Result, WrapErr};
use mettalex_addresses::ContractName;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    constants::{ADDRESS_FILE, ARGS_FILE, CACHE_FILE, ENV_PREFIX},
    errors::DeployError,
};

fn deserialize_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let dec_string: String = Deserialize::deserialize(deserializer)?;
    let u256 = U256::from_dec_str(&dec_string).map_err(serde::de::Error::custom)?;
    Ok(u256)
}

/// Overrides read from `METTALEX_*` environment variables.
#[derive(Debug, Default, Deserialize)]
pub struct Environment {
    pub config_path: Option<PathBuf>,
    pub build_dir: Option<PathBuf>,
    pub rpc_url: Option<String>,
    pub address_file: Option<PathBuf>,
    pub cache_file: Option<PathBuf>,
    pub args_file: Option<PathBuf>,
}

impl Environment {
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .wrap_err("couldn't read the environment")
    }

    /// The account file, `~/.mettalex/config-dev.json` unless overridden.
    pub fn config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config_path {
            return Ok(path.clone());
        }
        let home = env::var("HOME").wrap_err("HOME isn't set")?;
        Ok(Path::new(&home).join(".mettalex").join("config-dev.json"))
    }

    /// The directory containing the contract families' build outputs.
    pub fn build_dir(&self) -> PathBuf {
        self.build_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn deployment_files(&self) -> DeploymentFiles {
        DeploymentFiles {
            address_file: self
                .address_file
                .clone()
                .unwrap_or_else(|| ADDRESS_FILE.into()),
            cache_file: self
                .cache_file
                .clone()
                .unwrap_or_else(|| CACHE_FILE.into()),
            args_file: self.args_file.clone().unwrap_or_else(|| ARGS_FILE.into()),
        }
    }
}

/// The files a deployment reads and writes.
#[derive(Clone, Debug)]
pub struct DeploymentFiles {
    /// Addresses of an existing deployment, read when reconnecting.
    pub address_file: PathBuf,
    /// Where the addresses of the current deployment are recorded.
    pub cache_file: PathBuf,
    /// Per-network constructor arguments.
    pub args_file: PathBuf,
}

impl Default for DeploymentFiles {
    fn default() -> Self {
        Environment::default().deployment_files()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct InfuraConfig {
    pub project_id: String,
    pub secret: String,
}

#[derive(Clone, Deserialize)]
pub struct AccountEntry {
    pub key: String,
}

impl fmt::Debug for AccountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountEntry")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The account file: signing keys by alias plus optional Infura credentials.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountsFile {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default)]
    pub infura: Option<InfuraConfig>,
    #[serde(flatten)]
    pub accounts: BTreeMap<String, AccountEntry>,
}

impl AccountsFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).wrap_err_with(|| format!("couldn't open {}", path.display()))?;
        let mut accounts: AccountsFile = serde_json::from_reader(file)
            .wrap_err_with(|| format!("couldn't parse {}", path.display()))?;
        accounts.path = path.to_path_buf();
        Ok(accounts)
    }

    pub fn key(&self, alias: &str) -> Result<&str> {
        self.accounts
            .get(alias)
            .map(|entry| entry.key.as_str())
            .ok_or_else(|| {
                DeployError::MissingAccount {
                    alias: alias.to_string(),
                    path: self.path.clone(),
                }
                .into()
            })
    }

    pub fn infura(&self) -> Result<&InfuraConfig> {
        self.infura.as_ref().ok_or_else(|| {
            DeployError::MissingInfura {
                path: self.path.clone(),
            }
            .into()
        })
    }
}

/// The literal constructor parameters of a fresh deployment.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    // collateral configuration
    pub coin_name: String,
    pub coin_symbol: String,
    pub coin_decimals: u8,
    // position token configuration
    pub long_name: String,
    pub long_symbol: String,
    pub short_name: String,
    pub short_symbol: String,
    pub position_decimals: u8,
    pub position_version: u64,
    // vault configuration
    pub vault_name: String,
    pub vault_version: u64,
    #[serde(deserialize_with = "deserialize_u256")]
    pub cap: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub floor: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub collateral_per_unit: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub fee_rate: U256,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            coin_name: "Tether USD".into(),
            coin_symbol: "USDT".into(),
            coin_decimals: 18,
            long_name: "Long Position".into(),
            long_symbol: "LTOK".into(),
            short_name: "Short Position".into(),
            short_symbol: "STOK".into(),
            position_decimals: 6,
            position_version: 1,
            vault_name: "Mettalex Vault".into(),
            vault_version: 1,
            cap: U256::from(3_000_000u64),
            floor: U256::from(2_000_000u64),
            collateral_per_unit: U256::from(100_000_000u64),
            fee_rate: U256::from(300u64),
        }
    }
}

impl DeployConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).wrap_err_with(|| format!("couldn't open {}", path.display()))?;
        serde_json::from_reader(file).wrap_err_with(|| format!("couldn't parse {}", path.display()))
    }
}

/// Constructor arguments keyed by network and then by contract.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct ConstructorArgs(BTreeMap<String, BTreeMap<ContractName, Vec<Value>>>);

impl ConstructorArgs {
    /// Loads the argument file, returning `None` if it doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let file =
            File::open(path).wrap_err_with(|| format!("couldn't open {}", path.display()))?;
        let args = serde_json::from_reader(file)
            .wrap_err_with(|| format!("couldn't parse {}", path.display()))?;
        Ok(Some(args))
    }

    pub fn get(&self, network: &str, name: ContractName) -> Option<&[Value]> {
        self.0
            .get(network)
            .and_then(|contracts| contracts.get(&name))
            .map(Vec::as_slice)
    }

    /// Tokenizes a contract's arguments against its constructor inputs.
    pub fn for_contract(
        &self,
        network: &str,
        name: ContractName,
        inputs: &[ParamType],
    ) -> Result<Vec<Token>> {
        let values: &[Value] = match self.get(network, name) {
            Some(values) => values,
            // A constructor without inputs needs no entry.
            None if inputs.is_empty() => &[],
            None => {
                return Err(DeployError::MissingConstructorArgs {
                    name,
                    network: network.to_string(),
                }
                .into())
            }
        };
        if values.len() != inputs.len() {
            return Err(DeployError::ConstructorArgCount {
                name,
                expected: inputs.len(),
                actual: values.len(),
            }
            .into());
        }
        inputs
            .iter()
            .zip(values)
            .map(|(kind, value)| {
                tokenize_arg(kind, value)
                    .wrap_err_with(|| format!("couldn't encode {} argument {}", name, value))
            })
            .collect()
    }
}

/// Encodes a JSON value as an ABI token of the given type.
pub fn tokenize_arg(kind: &ParamType, value: &Value) -> Result<Token> {
    let text = value_to_text(value)?;
    let text = match kind {
        ParamType::Address | ParamType::Bytes | ParamType::FixedBytes(_) => {
            text.trim_start_matches("0x").to_string()
        }
        _ => text,
    };
    LenientTokenizer::tokenize(kind, &text).map_err(|err| eyre!("{}", err))
}

fn value_to_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        // Integers past u64 arrive as floats and have already lost
        // precision, so they must be written as strings.
        Value::Number(n) if n.is_f64() => Err(eyre!(
            "number {} isn't an exact integer; quote large values as strings",
            n
        )),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(values) => {
            let items = values
                .iter()
                .map(value_to_text)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("[{}]", items.join(",")))
        }
        _ => Err(eyre!("unsupported constructor argument {}", value)),
    }
}
