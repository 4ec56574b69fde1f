//! Loading of compiled contract artifacts. Each contract family is built
//! separately and lays out its outputs as `<family>/build/contracts/X.json`.
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use ethers::{
    abi::{Abi, ParamType},
    types::Bytes,
};
use eyre::Result;
use mettalex_addresses::ContractName;
use serde::Deserialize;
use tracing::warn;

use crate::{
    constants::{VAULT_CAP_POSITION, VAULT_FLOOR_POSITION},
    errors::DeployError,
};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    /// Truffle writes the creation code as a bare hex string.
    Hex(String),
    /// Foundry nests it in an object.
    Object { object: String },
}

#[derive(Deserialize)]
struct RawArtifact {
    abi: Abi,
    bytecode: RawBytecode,
}

/// The ABI and creation code of a contract.
#[derive(Clone, Debug)]
pub struct ContractArtifact {
    pub name: ContractName,
    pub path: PathBuf,
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn parse(name: ContractName, path: &Path, contents: &str) -> Result<Self> {
        let invalid = |reason: String| DeployError::InvalidArtifact {
            name,
            path: path.to_path_buf(),
            reason,
        };
        let raw: RawArtifact =
            serde_json::from_str(contents).map_err(|err| invalid(err.to_string()))?;
        let hex = match raw.bytecode {
            RawBytecode::Hex(hex) => hex,
            RawBytecode::Object { object } => object,
        };
        let bytecode: Bytes = hex
            .parse()
            .map_err(|_| invalid("bytecode isn't valid hex".into()))?;
        if bytecode.is_empty() {
            return Err(invalid("bytecode is empty".into()).into());
        }
        Ok(Self {
            name,
            path: path.to_path_buf(),
            abi: raw.abi,
            bytecode,
        })
    }

    /// The types of the constructor's parameters, in order.
    pub fn constructor_inputs(&self) -> Vec<ParamType> {
        self.abi
            .constructor()
            .map(|constructor| {
                constructor
                    .inputs
                    .iter()
                    .map(|input| input.kind.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn constructor_input_name(&self, position: usize) -> Option<String> {
        self.abi
            .constructor()
            .and_then(|constructor| constructor.inputs.get(position))
            .map(|input| input.name.trim_start_matches('_').to_lowercase())
    }
}

/// How the vault's constructor orders its price bounds relative to the
/// order the deployer passes them in (cap, then floor).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoundOrder {
    Matches,
    Swapped,
    Unknown,
}

/// Inspects the parameter names of the vault's constructor.
pub fn vault_bound_order(vault: &ContractArtifact) -> BoundOrder {
    let cap = vault.constructor_input_name(VAULT_CAP_POSITION);
    let floor = vault.constructor_input_name(VAULT_FLOOR_POSITION);
    match (cap.as_deref(), floor.as_deref()) {
        (Some(cap), Some(floor)) if cap.contains("cap") && floor.contains("floor") => {
            BoundOrder::Matches
        }
        (Some(cap), Some(floor)) if cap.contains("floor") && floor.contains("cap") => {
            BoundOrder::Swapped
        }
        _ => BoundOrder::Unknown,
    }
}

/// Warns when the vault artifact's bounds aren't in the order the deployer
/// passes them.
pub fn check_vault_bounds(vault: &ContractArtifact) -> BoundOrder {
    let order = vault_bound_order(vault);
    match order {
        BoundOrder::Matches => {}
        BoundOrder::Swapped => warn!(
            path = %vault.path.display(),
            "vault constructor takes floor before cap; the configured bounds will be swapped on chain"
        ),
        BoundOrder::Unknown => warn!(
            path = %vault.path.display(),
            "couldn't identify the vault's cap and floor parameters"
        ),
    }
    order
}

/// Reads artifacts from the build directory.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, name: ContractName) -> PathBuf {
        let (family, artifact) = match name {
            ContractName::BFactory => ("mettalex-balancer", "BFactory"),
            ContractName::BPool => ("mettalex-balancer", "BPool"),
            ContractName::Coin => ("mettalex-vault", "CoinToken"),
            ContractName::Long | ContractName::Short => ("mettalex-vault", "PositionToken"),
            ContractName::Vault => ("mettalex-vault", "Vault"),
            ContractName::YController => ("mettalex-yearn", "Controller"),
            ContractName::YVault => ("mettalex-yearn", "yVault"),
            ContractName::PoolController => ("pool-controller", "StrategyBalancerMettalex"),
        };
        self.base_dir
            .join(family)
            .join("build")
            .join("contracts")
            .join(format!("{}.json", artifact))
    }

    pub fn load(&self, name: ContractName) -> Result<ContractArtifact> {
        let path = self.path_for(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DeployError::ArtifactNotFound { name, path }.into())
            }
            Err(err) => return Err(err.into()),
        };
        ContractArtifact::parse(name, &path, &contents)
    }

    /// Loads every contract's artifact.
    pub fn load_all(&self) -> Result<Artifacts> {
        let artifacts = ContractName::ALL
            .into_iter()
            .map(|name| Ok((name, self.load(name)?)))
            .collect::<Result<_>>()?;
        Ok(Artifacts(artifacts))
    }
}

/// The loaded artifacts of every contract.
#[derive(Clone, Debug)]
pub struct Artifacts(BTreeMap<ContractName, ContractArtifact>);

impl Artifacts {
    pub fn get(&self, name: ContractName) -> Result<&ContractArtifact> {
        self.0.get(&name).ok_or_else(|| {
            DeployError::ArtifactNotFound {
                name,
                path: PathBuf::new(),
            }
            .into()
        })
    }
}

impl FromIterator<ContractArtifact> for Artifacts {
    fn from_iter<I: IntoIterator<Item = ContractArtifact>>(iter: I) -> Self {
        Artifacts(
            iter.into_iter()
                .map(|artifact| (artifact.name, artifact))
                .collect(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::tempdir;

    use super::*;

    /// A minimal artifact whose constructor takes the given parameters.
    pub(crate) fn artifact_json(inputs: &[(&str, &str)], foundry: bool) -> String {
        let inputs = inputs
            .iter()
            .map(|(name, kind)| {
                format!(
                    r#"{{ "name": "{}", "type": "{}", "internalType": "{}" }}"#,
                    name, kind, kind
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        let bytecode = if foundry {
            r#"{ "object": "0x6080604052" }"#.to_string()
        } else {
            r#""0x6080604052""#.to_string()
        };
        format!(
            r#"{{
                "contractName": "Test",
                "abi": [
                    {{ "type": "constructor", "stateMutability": "nonpayable", "inputs": [{}] }}
                ],
                "bytecode": {}
            }}"#,
            inputs, bytecode
        )
    }

    pub(crate) fn vault_inputs(cap_first: bool) -> Vec<(&'static str, &'static str)> {
        let (first, second) = if cap_first {
            ("_cap", "_floor")
        } else {
            ("_floor", "_cap")
        };
        vec![
            ("_name", "string"),
            ("_version", "uint256"),
            ("_collateralToken", "address"),
            ("_longPosition", "address"),
            ("_shortPosition", "address"),
            ("_oracleAddress", "address"),
            ("_ammPoolController", "address"),
            (first, "uint256"),
            (second, "uint256"),
            ("_collateralPerUnit", "uint256"),
            ("_collateralFeePerUnit", "uint256"),
        ]
    }

    #[test]
    fn test_missing_artifact() -> Result<()> {
        let dir = tempdir()?;
        let store = ArtifactStore::new(dir.path());
        let err = store.load(ContractName::Vault).unwrap_err();
        match err.downcast_ref::<DeployError>() {
            Some(DeployError::ArtifactNotFound { name, path }) => {
                assert_eq!(*name, ContractName::Vault);
                assert!(path.ends_with("mettalex-vault/build/contracts/Vault.json"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_bytecode_encodings() -> Result<()> {
        let path = Path::new("Coin.json");
        let truffle = ContractArtifact::parse(
            ContractName::Coin,
            path,
            &artifact_json(&[("name", "string")], false),
        )?;
        let foundry = ContractArtifact::parse(
            ContractName::Coin,
            path,
            &artifact_json(&[("name", "string")], true),
        )?;
        assert_eq!(truffle.bytecode, foundry.bytecode);
        assert_eq!(truffle.bytecode.len(), 5);
        assert_eq!(truffle.constructor_inputs(), vec![ParamType::String]);
        Ok(())
    }

    #[test]
    fn test_invalid_artifact() {
        let err = ContractArtifact::parse(
            ContractName::Coin,
            Path::new("Coin.json"),
            r#"{ "abi": [] }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::InvalidArtifact { .. })
        ));
    }

    #[test]
    fn test_positions_share_an_artifact() {
        let store = ArtifactStore::new("build");
        assert_eq!(
            store.path_for(ContractName::Long),
            store.path_for(ContractName::Short)
        );
        assert!(store
            .path_for(ContractName::PoolController)
            .ends_with("pool-controller/build/contracts/StrategyBalancerMettalex.json"));
    }

    #[test]
    fn test_load_all() -> Result<()> {
        let dir = tempdir()?;
        let store = ArtifactStore::new(dir.path());
        for name in ContractName::ALL {
            let path = store.path_for(name);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(&path, artifact_json(&[], false))?;
        }
        let artifacts = store.load_all()?;
        assert_eq!(artifacts.get(ContractName::YVault)?.name, ContractName::YVault);
        Ok(())
    }

    #[test]
    fn test_vault_bound_order() -> Result<()> {
        let path = Path::new("Vault.json");
        let vault = ContractArtifact::parse(
            ContractName::Vault,
            path,
            &artifact_json(&vault_inputs(true), false),
        )?;
        assert_eq!(vault_bound_order(&vault), BoundOrder::Matches);

        let swapped = ContractArtifact::parse(
            ContractName::Vault,
            path,
            &artifact_json(&vault_inputs(false), false),
        )?;
        assert_eq!(check_vault_bounds(&swapped), BoundOrder::Swapped);

        let unnamed = ContractArtifact::parse(ContractName::Vault, path, &artifact_json(&[], true))?;
        assert_eq!(vault_bound_order(&unnamed), BoundOrder::Unknown);

        Ok(())
    }
}
