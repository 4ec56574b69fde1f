pub mod artifacts;
pub mod deploy;
pub mod plan;
pub mod wiring;

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use ethers::{
    middleware::{MiddlewareError, SignerMiddleware},
    providers::{Authorization, Http, Middleware, PendingTransaction, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, TransactionRequest,
    },
};
use eyre::{Result, WrapErr};
use reqwest::Url;
use thiserror::Error;
use tracing::info;

use crate::{
    config::{AccountsFile, InfuraConfig},
    constants::{
        BSC_TESTNET_CHAIN_ID, BSC_TESTNET_RPC_URL, KOVAN_CHAIN_ID, KOVAN_RPC_URL, LOCAL_RPC_URL,
    },
    errors::DeployError,
};

/// The networks the deployer knows how to reach.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Local,
    Kovan,
    BscTestnet,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Local => "local",
            Network::Kovan => "kovan",
            Network::BscTestnet => "bsc-testnet",
        }
    }

    /// The key of this network's section in the constructor argument file.
    pub fn args_key(&self) -> &'static str {
        match self {
            Network::Local => "development",
            Network::Kovan => "kovan",
            Network::BscTestnet => "bsc-testnet",
        }
    }

    pub fn expected_chain_id(&self) -> Option<u64> {
        match self {
            Network::Local => None,
            Network::Kovan => Some(KOVAN_CHAIN_ID),
            Network::BscTestnet => Some(BSC_TESTNET_CHAIN_ID),
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Local => LOCAL_RPC_URL,
            Network::Kovan => KOVAN_RPC_URL,
            Network::BscTestnet => BSC_TESTNET_RPC_URL,
        }
    }

    /// Remote networks sign locally with a key from the account file.
    pub fn requires_signer(&self) -> bool {
        !matches!(self, Network::Local)
    }

    /// Proof-of-authority chains only accept legacy transactions.
    pub fn is_proof_of_authority(&self) -> bool {
        matches!(self, Network::BscTestnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Network::Local),
            "kovan" => Ok(Network::Kovan),
            "bsc-testnet" => Ok(Network::BscTestnet),
            _ => Err(DeployError::UnknownNetwork(s.to_string())),
        }
    }
}

/// Connection settings for a single run.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub network: Network,
    /// Replaces the network's default endpoint.
    pub rpc_url: Option<String>,
    pub infura: Option<InfuraConfig>,
}

impl ChainConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            rpc_url: None,
            infura: None,
        }
    }

    /// Builds the endpoint URL and the credentials it needs, if any.
    pub fn endpoint(&self) -> Result<(Url, Option<Authorization>)> {
        if let Some(rpc_url) = &self.rpc_url {
            let url = Url::parse(rpc_url).wrap_err_with(|| format!("invalid rpc url {}", rpc_url))?;
            return Ok((url, None));
        }
        match self.network {
            Network::Kovan => {
                let infura = self.infura.as_ref().ok_or_else(|| {
                    eyre::eyre!("kovan needs infura credentials or an explicit rpc url")
                })?;
                let url = Url::parse(&format!("{}/{}", KOVAN_RPC_URL, infura.project_id))?;
                Ok((url, Some(Authorization::basic("", &infura.secret))))
            }
            network => Ok((Url::parse(network.default_rpc_url())?, None)),
        }
    }
}

/// The identity that signs every deployment and wiring transaction.
#[derive(Clone, Debug)]
pub enum Account {
    /// An account the node holds the key for.
    Unlocked(Address),
    /// A key held by this process.
    Local(LocalWallet),
}

impl Account {
    pub fn address(&self) -> Address {
        match self {
            Account::Unlocked(address) => *address,
            Account::Local(wallet) => wallet.address(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainClientError<M: Middleware> {
    #[error("{0}")]
    Middleware(M::Error),
}

impl<M: Middleware> MiddlewareError for ChainClientError<M> {
    type Inner = M::Error;

    fn from_err(src: M::Error) -> Self {
        ChainClientError::Middleware(src)
    }

    fn as_inner(&self) -> Option<&Self::Inner> {
        match self {
            ChainClientError::Middleware(err) => Some(err),
        }
    }
}

/// A pass-through client that pins the sending address and, on
/// proof-of-authority chains, rewrites outgoing transactions into legacy
/// envelopes before they reach the rest of the stack.
#[derive(Debug)]
pub struct ChainClient<M> {
    inner: M,
    address: Address,
    legacy: bool,
}

impl<M: Middleware> ChainClient<M> {
    pub fn new(inner: M, address: Address, legacy: bool) -> Self {
        Self {
            inner,
            address,
            legacy,
        }
    }

    /// Gets the client's address.
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl<M: Middleware> Middleware for ChainClient<M> {
    type Error = ChainClientError<M>;
    type Provider = M::Provider;
    type Inner = M;

    fn inner(&self) -> &M {
        &self.inner
    }

    fn default_sender(&self) -> Option<Address> {
        Some(self.address)
    }

    async fn send_transaction<T: Into<TypedTransaction> + Send + Sync>(
        &self,
        tx: T,
        block: Option<BlockId>,
    ) -> Result<PendingTransaction<'_, Self::Provider>, Self::Error> {
        let mut tx: TypedTransaction = tx.into();
        if tx.from().is_none() {
            tx.set_from(self.address);
        }
        if self.legacy {
            tx = into_legacy(tx);
        }
        self.inner
            .send_transaction(tx, block)
            .await
            .map_err(MiddlewareError::from_err)
    }
}

/// Converts a transaction into the pre-EIP-1559 envelope, dropping the fee
/// market fields so that the gas price is filled in by the node.
pub fn into_legacy(tx: TypedTransaction) -> TypedTransaction {
    match tx {
        TypedTransaction::Eip1559(tx) => TypedTransaction::Legacy(TransactionRequest {
            from: tx.from,
            to: tx.to,
            gas: tx.gas,
            value: tx.value,
            data: tx.data,
            nonce: tx.nonce,
            chain_id: tx.chain_id,
            ..Default::default()
        }),
        TypedTransaction::Eip2930(tx) => TypedTransaction::Legacy(tx.tx),
        tx => tx,
    }
}

/// A client using an account unlocked on the node.
pub type UnlockedClient = ChainClient<Provider<Http>>;

/// A client signing with a local key.
pub type SigningClient = ChainClient<SignerMiddleware<Provider<Http>, LocalWallet>>;

/// A live connection to a node on a known network.
pub struct Chain {
    provider: Provider<Http>,
    network: Network,
    chain_id: u64,
}

impl Chain {
    /// Connects to the node described by the config. This fails fast if the
    /// node can't be reached or reports a chain id that doesn't belong to the
    /// requested network.
    pub async fn connect(config: &ChainConfig) -> Result<Self> {
        let (url, auth) = config.endpoint()?;
        let endpoint = url.origin().ascii_serialization();
        let http = match auth {
            Some(auth) => Http::new_with_auth(url, auth)?,
            None => Http::new(url),
        };
        let interval = match config.network {
            Network::Local => Duration::from_millis(100),
            _ => Duration::from_secs(2),
        };
        let provider = Provider::new(http).interval(interval);

        let chain_id =
            provider
                .get_chainid()
                .await
                .map_err(|err| DeployError::Connectivity {
                    url: endpoint.clone(),
                    reason: err.to_string(),
                })?;
        let chain_id = chain_id.low_u64();
        if let Some(expected) = config.network.expected_chain_id() {
            if chain_id != expected {
                return Err(DeployError::UnexpectedChainId {
                    url: endpoint,
                    expected,
                    actual: chain_id,
                }
                .into());
            }
        }
        info!(network = %config.network, chain_id, "connected");

        Ok(Self {
            provider,
            network: config.network,
            chain_id,
        })
    }

    pub fn provider(&self) -> Provider<Http> {
        self.provider.clone()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Resolves the admin account. Local chains use the node's first
    /// unlocked account; remote networks use the key stored under `alias`.
    pub async fn resolve_account(
        &self,
        accounts: Option<&AccountsFile>,
        alias: &str,
    ) -> Result<Account> {
        if !self.network.requires_signer() {
            let unlocked = self.provider.get_accounts().await?;
            return match unlocked.first() {
                Some(address) => Ok(Account::Unlocked(*address)),
                None => Err(DeployError::NoUnlockedAccount {
                    url: self.provider.url().to_string(),
                }
                .into()),
            };
        }
        let accounts = accounts.ok_or_else(|| eyre::eyre!("{} needs an account file", self.network))?;
        let wallet = accounts
            .key(alias)?
            .parse::<LocalWallet>()
            .wrap_err_with(|| format!("invalid key for account {}", alias))?
            .with_chain_id(self.chain_id);
        Ok(Account::Local(wallet))
    }

    pub fn unlocked_client(&self, address: Address) -> Arc<UnlockedClient> {
        Arc::new(ChainClient::new(
            self.provider().with_sender(address),
            address,
            self.network.is_proof_of_authority(),
        ))
    }

    pub fn signing_client(&self, wallet: LocalWallet) -> Arc<SigningClient> {
        let address = wallet.address();
        let wallet = wallet.with_chain_id(self.chain_id);
        Arc::new(ChainClient::new(
            SignerMiddleware::new(self.provider(), wallet),
            address,
            self.network.is_proof_of_authority(),
        ))
    }
}
