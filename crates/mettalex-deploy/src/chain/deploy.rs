//! This module contains the deployer, which runs deploy plans against a
//! chain, and the handles it produces for the deployed contracts.
use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};

use ethers::{
    abi::{Abi, Detokenize, RawLog, Token, Tokenize},
    contract::{Contract, ContractFactory},
    providers::Middleware,
    types::{Address, TransactionReceipt, U64},
};
use eyre::{eyre, Result, WrapErr};
use mettalex_addresses::{Addresses, ContractName};
use tracing::info;

use super::{
    artifacts::{check_vault_bounds, Artifacts},
    plan::{ArgSource, DeployPlan, Strategy},
    Network,
};
use crate::{
    config::{ConstructorArgs, DeployConfig, DeploymentFiles},
    constants::{NEW_POOL_METHOD, POOL_CREATION_GAS},
    errors::DeployError,
};

/// Checks that a transaction was mined and didn't revert.
pub fn check_receipt(receipt: Option<TransactionReceipt>, action: &str) -> Result<TransactionReceipt> {
    let receipt = receipt.ok_or_else(|| DeployError::TransactionDropped {
        action: action.to_string(),
    })?;
    if receipt.status == Some(U64::zero()) {
        return Err(DeployError::TransactionReverted {
            action: action.to_string(),
            tx_hash: receipt.transaction_hash,
        }
        .into());
    }
    Ok(receipt)
}

/// Finds the first `event` emitted by `factory` in the receipt and returns
/// the address stored in its `argument` field.
pub fn address_from_event(
    abi: &Abi,
    factory: Address,
    event: &str,
    argument: &str,
    receipt: &TransactionReceipt,
) -> Result<Option<Address>> {
    let event = abi.event(event)?;
    let signature = event.signature();
    let log = match receipt
        .logs
        .iter()
        .find(|log| log.address == factory && log.topics.first() == Some(&signature))
    {
        Some(log) => log,
        None => return Ok(None),
    };
    let parsed = event.parse_log(RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    })?;
    let param = parsed
        .params
        .into_iter()
        .find(|param| param.name == argument)
        .ok_or_else(|| eyre!("{} has no argument named {}", event.name, argument))?;
    param
        .value
        .into_address()
        .map(Some)
        .ok_or_else(|| eyre!("{}.{} isn't an address", event.name, argument))
}

/// A deployed contract bound to its ABI.
pub struct ContractHandle<M> {
    pub name: ContractName,
    pub contract: Contract<M>,
}

impl<M: Middleware> Clone for ContractHandle<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            contract: self.contract.clone(),
        }
    }
}

impl<M: Middleware> fmt::Debug for ContractHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("name", &self.name)
            .field("address", &self.contract.address())
            .finish()
    }
}

impl<M: Middleware + 'static> ContractHandle<M> {
    pub fn bind(name: ContractName, address: Address, abi: Abi, client: Arc<M>) -> Self {
        Self {
            name,
            contract: Contract::new(address, abi, client),
        }
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn abi(&self) -> &Abi {
        self.contract.abi()
    }

    /// Calls a view function.
    pub async fn read<T: Tokenize, D: Detokenize>(&self, method: &str, args: T) -> Result<D> {
        self.contract
            .method::<T, D>(method, args)?
            .call()
            .await
            .wrap_err_with(|| format!("{}.{}", self.name, method))
    }

    /// Sends a transaction with an explicit gas limit and waits for its
    /// receipt.
    pub async fn transact<T: Tokenize>(
        &self,
        method: &str,
        args: T,
        gas: u64,
    ) -> Result<TransactionReceipt> {
        let action = format!("{}.{}", self.name, method);
        let call = self.contract.method::<T, ()>(method, args)?.gas(gas);
        let pending = call.send().await.wrap_err_with(|| action.clone())?;
        check_receipt(pending.await?, &action)
    }
}

/// The handles of a complete deployment.
pub struct DeployedSystem<M> {
    pub factory: ContractHandle<M>,
    pub pool: ContractHandle<M>,
    pub coin: ContractHandle<M>,
    pub long: ContractHandle<M>,
    pub short: ContractHandle<M>,
    pub vault: ContractHandle<M>,
    pub y_controller: ContractHandle<M>,
    pub y_vault: ContractHandle<M>,
    pub strategy: ContractHandle<M>,
}

impl<M: Middleware + 'static> DeployedSystem<M> {
    fn from_handles(mut handles: BTreeMap<ContractName, ContractHandle<M>>) -> Result<Self> {
        let mut take = |name: ContractName| {
            handles
                .remove(&name)
                .ok_or_else(|| eyre!("{} wasn't deployed", name))
        };
        Ok(Self {
            factory: take(ContractName::BFactory)?,
            pool: take(ContractName::BPool)?,
            coin: take(ContractName::Coin)?,
            long: take(ContractName::Long)?,
            short: take(ContractName::Short)?,
            vault: take(ContractName::Vault)?,
            y_controller: take(ContractName::YController)?,
            y_vault: take(ContractName::YVault)?,
            strategy: take(ContractName::PoolController)?,
        })
    }

    pub fn handles(&self) -> [&ContractHandle<M>; 9] {
        [
            &self.factory,
            &self.pool,
            &self.coin,
            &self.long,
            &self.short,
            &self.vault,
            &self.y_controller,
            &self.y_vault,
            &self.strategy,
        ]
    }

    pub fn addresses(&self) -> Addresses {
        let mut addresses = Addresses::default();
        for handle in self.handles() {
            addresses.set(handle.name, handle.address());
        }
        addresses
    }
}

/// Deploys and binds contracts with a single admin account.
pub struct Deployer<M> {
    client: Arc<M>,
    admin: Address,
    artifacts: Artifacts,
}

impl<M: Middleware + 'static> Deployer<M> {
    pub fn new(client: Arc<M>, admin: Address, artifacts: Artifacts) -> Self {
        Self {
            client,
            admin,
            artifacts,
        }
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Binds a contract's ABI to an address without sending anything.
    pub fn bind(&self, name: ContractName, address: Address) -> Result<ContractHandle<M>> {
        let artifact = self.artifacts.get(name)?;
        Ok(ContractHandle::bind(
            name,
            address,
            artifact.abi.clone(),
            self.client.clone(),
        ))
    }

    /// Deploys a contract from its artifact and waits for it to be mined.
    pub async fn deploy_contract(
        &self,
        name: ContractName,
        args: Vec<Token>,
    ) -> Result<ContractHandle<M>> {
        let artifact = self.artifacts.get(name)?;
        let expected = artifact.constructor_inputs().len();
        if args.len() != expected {
            return Err(DeployError::ConstructorArgCount {
                name,
                expected,
                actual: args.len(),
            }
            .into());
        }

        let action = format!("deploy {}", name);
        let factory = ContractFactory::new(
            artifact.abi.clone(),
            artifact.bytecode.clone(),
            self.client.clone(),
        );
        let deployment = factory
            .deploy_tokens(args)
            .wrap_err_with(|| action.clone())?;
        let pending = self
            .client
            .send_transaction(deployment.tx, None)
            .await
            .wrap_err_with(|| action.clone())?;
        let receipt = check_receipt(pending.await?, &action)?;
        let address = receipt
            .contract_address
            .ok_or(DeployError::MissingContractAddress { name })?;
        info!(contract = %name, ?address, "deployed");

        self.bind(name, address)
    }

    /// Asks the factory for a new pool and binds the pool announced in the
    /// factory's event.
    pub async fn create_pool(
        &self,
        name: ContractName,
        factory: &ContractHandle<M>,
        event: &str,
        argument: &str,
    ) -> Result<ContractHandle<M>> {
        let receipt = factory
            .transact(NEW_POOL_METHOD, (), POOL_CREATION_GAS)
            .await?;
        let address = address_from_event(factory.abi(), factory.address(), event, argument, &receipt)?
            .ok_or_else(|| DeployError::MissingEvent {
                contract: factory.name,
                event: event.to_string(),
            })?;
        info!(contract = %name, ?address, "created by {}", factory.name);

        self.bind(name, address)
    }

    /// Runs every step of a plan in order.
    pub async fn execute(&self, plan: &DeployPlan) -> Result<DeployedSystem<M>> {
        plan.validate()?;

        let mut handles: BTreeMap<ContractName, ContractHandle<M>> = BTreeMap::new();
        for step in &plan.steps {
            let name = step.name;
            if name == ContractName::Vault && step.strategy.is_deployment() {
                check_vault_bounds(self.artifacts.get(name)?);
            }
            let handle = match &step.strategy {
                Strategy::Existing(address) => {
                    info!(contract = %name, address = ?address, "connecting to deployed contract");
                    self.bind(name, *address)?
                }
                Strategy::Plain(args) => self.deploy_contract(name, args.clone()).await?,
                Strategy::Factory {
                    factory,
                    event,
                    argument,
                } => {
                    let factory = handles.get(factory).ok_or(DeployError::UnresolvedDependency {
                        contract: name,
                        dependency: *factory,
                    })?;
                    self.create_pool(name, factory, event, argument).await?
                }
                Strategy::Dependent(args) => {
                    let args = args
                        .iter()
                        .map(|arg| match arg {
                            ArgSource::Literal(token) => Ok(token.clone()),
                            ArgSource::Admin => Ok(Token::Address(self.admin)),
                            ArgSource::Deployed(dependency) => handles
                                .get(dependency)
                                .map(|handle| Token::Address(handle.address()))
                                .ok_or_else(|| {
                                    DeployError::UnresolvedDependency {
                                        contract: name,
                                        dependency: *dependency,
                                    }
                                    .into()
                                }),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    self.deploy_contract(name, args).await?
                }
            };
            handles.insert(name, handle);
        }

        DeployedSystem::from_handles(handles)
    }

    /// Deploys every contract from scratch and records the addresses in the
    /// cache file.
    pub async fn deploy(&self, config: &DeployConfig, cache_file: &Path) -> Result<DeployedSystem<M>> {
        let system = self.execute(&DeployPlan::fresh(config)).await?;
        system.addresses().save(cache_file)?;
        info!(cache = %cache_file.display(), "deployment recorded");
        Ok(system)
    }

    /// Binds the deployment in the address file without sending anything.
    /// Fails if the file is missing or any contract lacks an address.
    pub async fn bind_deployed(&self, address_file: &Path) -> Result<DeployedSystem<M>> {
        let cache = Addresses::load(address_file)?
            .ok_or_else(|| eyre!("no address file at {}", address_file.display()))?;
        self.execute(&DeployPlan::bind(&cache, address_file)?).await
    }

    /// Reconnects to the deployment in the address file, deploying whatever
    /// it doesn't list. Returns `None` when there is nothing to connect to.
    pub async fn connect_deployed(
        &self,
        network: Network,
        files: &DeploymentFiles,
    ) -> Result<Option<DeployedSystem<M>>> {
        let cache = match Addresses::load(&files.address_file)? {
            Some(cache) => cache,
            None => {
                info!(path = %files.address_file.display(), "no address file, nothing to do");
                return Ok(None);
            }
        };
        let args = match ConstructorArgs::load(&files.args_file)? {
            Some(args) => args,
            None => {
                info!(path = %files.args_file.display(), "no args file, nothing to do");
                return Ok(None);
            }
        };

        let plan = DeployPlan::connect(&cache, &args, network, &self.artifacts)?;
        let system = self.execute(&plan).await?;
        system.addresses().save(&files.cache_file)?;
        info!(cache = %files.cache_file.display(), "deployment recorded");
        Ok(Some(system))
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::{Log, H256};

    use super::*;

    fn factory_abi() -> Result<Abi> {
        Ok(serde_json::from_str(
            r#"[
                {
                    "type": "event",
                    "name": "LOG_NEW_POOL",
                    "anonymous": false,
                    "inputs": [
                        { "name": "caller", "type": "address", "indexed": true },
                        { "name": "pool", "type": "address", "indexed": true }
                    ]
                },
                {
                    "type": "event",
                    "name": "LOG_BLABS",
                    "anonymous": false,
                    "inputs": [
                        { "name": "caller", "type": "address", "indexed": true },
                        { "name": "blabs", "type": "address", "indexed": true }
                    ]
                }
            ]"#,
        )?)
    }

    fn log(address: Address, topics: Vec<H256>) -> Log {
        Log {
            address,
            topics,
            ..Default::default()
        }
    }

    #[test]
    fn test_pool_from_event() -> Result<()> {
        let abi = factory_abi()?;
        let factory = Address::from_low_u64_be(1);
        let caller = Address::from_low_u64_be(2);
        let pool = Address::from_low_u64_be(3);
        let new_pool = abi.event("LOG_NEW_POOL")?.signature();
        let blabs = abi.event("LOG_BLABS")?.signature();

        let receipt = TransactionReceipt {
            logs: vec![
                // Another event from the factory.
                log(factory, vec![blabs, caller.into(), caller.into()]),
                // The same event from some other contract.
                log(
                    Address::from_low_u64_be(9),
                    vec![new_pool, caller.into(), Address::from_low_u64_be(8).into()],
                ),
                log(factory, vec![new_pool, caller.into(), pool.into()]),
            ],
            ..Default::default()
        };

        assert_eq!(
            address_from_event(&abi, factory, "LOG_NEW_POOL", "pool", &receipt)?,
            Some(pool)
        );
        assert_eq!(
            address_from_event(
                &abi,
                factory,
                "LOG_NEW_POOL",
                "pool",
                &TransactionReceipt::default()
            )?,
            None
        );
        assert!(address_from_event(&abi, factory, "LOG_NEW_POOL", "token", &receipt).is_err());

        Ok(())
    }

    #[test]
    fn test_check_receipt() -> Result<()> {
        let err = check_receipt(None, "Coin.approve").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::TransactionDropped { .. })
        ));

        let reverted = TransactionReceipt {
            status: Some(U64::zero()),
            ..Default::default()
        };
        let err = check_receipt(Some(reverted), "Coin.approve").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::TransactionReverted { .. })
        ));

        let mined = TransactionReceipt {
            status: Some(U64::one()),
            ..Default::default()
        };
        check_receipt(Some(mined), "Coin.approve")?;

        Ok(())
    }
}
