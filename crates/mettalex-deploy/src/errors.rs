use std::path::PathBuf;

use ethers::types::H256;
use mettalex_addresses::ContractName;
use thiserror::Error;

/// The failures that the deployer reports on its own account. Transport and
/// contract errors from ethers are propagated as they are; these variants are
/// wrapped in an `eyre::Report` and can be recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("couldn't reach the node at {url}: {reason}")]
    Connectivity { url: String, reason: String },
    #[error("the node at {url} reports chain id {actual}, expected {expected}")]
    UnexpectedChainId {
        url: String,
        expected: u64,
        actual: u64,
    },
    #[error("the node at {url} exposes no unlocked accounts")]
    NoUnlockedAccount { url: String },
    #[error("unknown network {0}")]
    UnknownNetwork(String),
    #[error("no account named {alias} in {}", path.display())]
    MissingAccount { alias: String, path: PathBuf },
    #[error("no infura credentials in {}", path.display())]
    MissingInfura { path: PathBuf },
    #[error("no artifact for {name} at {}", path.display())]
    ArtifactNotFound { name: ContractName, path: PathBuf },
    #[error("invalid artifact for {name} at {}: {reason}", path.display())]
    InvalidArtifact {
        name: ContractName,
        path: PathBuf,
        reason: String,
    },
    #[error("no constructor arguments for {name} on {network}")]
    MissingConstructorArgs { name: ContractName, network: String },
    #[error("{name} takes {expected} constructor arguments, got {actual}")]
    ConstructorArgCount {
        name: ContractName,
        expected: usize,
        actual: usize,
    },
    #[error("{contract} depends on {dependency}, which isn't deployed before it")]
    UnresolvedDependency {
        contract: ContractName,
        dependency: ContractName,
    },
    #[error("{action}: transaction was dropped")]
    TransactionDropped { action: String },
    #[error("{action}: transaction {tx_hash:?} reverted")]
    TransactionReverted { action: String, tx_hash: H256 },
    #[error("{name} has no address in {}", path.display())]
    NotDeployed { name: ContractName, path: PathBuf },
    #[error("{name}: receipt has no contract address")]
    MissingContractAddress { name: ContractName },
    #[error("{contract} emitted no {event} event")]
    MissingEvent {
        contract: ContractName,
        event: String,
    },
}
