//! The deploy plan: an ordered list of contracts, each with the strategy
//! used to bring it on chain. Building a plan never touches the chain, so
//! the reconnect decisions can be checked in isolation.
use std::path::Path;

use ethers::{
    abi::Token,
    types::{Address, U256},
};
use eyre::Result;
use mettalex_addresses::{Addresses, ContractName};

use super::{artifacts::Artifacts, Network};
use crate::{
    config::{ConstructorArgs, DeployConfig},
    constants::{NEW_POOL_ARGUMENT, NEW_POOL_EVENT},
    errors::DeployError,
};

/// Where a constructor argument comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgSource {
    Literal(Token),
    /// The admin account's address.
    Admin,
    /// The address of a contract deployed by an earlier step.
    Deployed(ContractName),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    /// Already on chain; bind to the address without a transaction.
    Existing(Address),
    /// Deploy with literal constructor arguments.
    Plain(Vec<Token>),
    /// Ask a factory to create the contract and read its address from the
    /// factory's event.
    Factory {
        factory: ContractName,
        event: &'static str,
        argument: &'static str,
    },
    /// Deploy with arguments that refer to the admin or earlier contracts.
    Dependent(Vec<ArgSource>),
}

impl Strategy {
    fn pool_factory() -> Self {
        Strategy::Factory {
            factory: ContractName::BFactory,
            event: NEW_POOL_EVENT,
            argument: NEW_POOL_ARGUMENT,
        }
    }

    /// The contracts that must exist before this strategy can run.
    pub fn dependencies(&self) -> Vec<ContractName> {
        match self {
            Strategy::Existing(_) | Strategy::Plain(_) => vec![],
            Strategy::Factory { factory, .. } => vec![*factory],
            Strategy::Dependent(args) => args
                .iter()
                .filter_map(|arg| match arg {
                    ArgSource::Deployed(name) => Some(*name),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn is_deployment(&self) -> bool {
        !matches!(self, Strategy::Existing(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeployStep {
    pub name: ContractName,
    pub strategy: Strategy,
}

impl DeployStep {
    fn new(name: ContractName, strategy: Strategy) -> Self {
        Self { name, strategy }
    }
}

// How a contract missing from the address file is brought on chain when
// reconnecting. Contracts with a literal recipe take their arguments from
// the argument file.
enum Slot {
    Admin,
    Contract(ContractName),
}

enum Recipe {
    Literal,
    Factory,
    Dependent(&'static [Slot]),
}

fn reconnect_recipe(name: ContractName) -> Recipe {
    use ContractName::*;
    match name {
        BPool => Recipe::Factory,
        YController => Recipe::Dependent(&[Slot::Admin]),
        YVault => Recipe::Dependent(&[Slot::Contract(Coin), Slot::Contract(YController)]),
        PoolController => Recipe::Dependent(&[
            Slot::Contract(YController),
            Slot::Contract(Coin),
            Slot::Contract(BPool),
            Slot::Contract(Vault),
            Slot::Contract(Long),
            Slot::Contract(Short),
        ]),
        BFactory | Coin | Long | Short | Vault => Recipe::Literal,
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeployPlan {
    pub steps: Vec<DeployStep>,
}

impl DeployPlan {
    /// The plan of a deployment from scratch.
    pub fn fresh(config: &DeployConfig) -> Self {
        use ContractName::*;

        let string = |s: &str| ArgSource::Literal(Token::String(s.to_string()));
        let uint = |n: U256| ArgSource::Literal(Token::Uint(n));
        let literals = |args: Vec<ArgSource>| {
            Strategy::Plain(
                args.into_iter()
                    .filter_map(|arg| match arg {
                        ArgSource::Literal(token) => Some(token),
                        _ => None,
                    })
                    .collect(),
            )
        };
        let position = |name: &str, symbol: &str| {
            literals(vec![
                string(name),
                string(symbol),
                uint(config.position_decimals.into()),
                uint(config.position_version.into()),
            ])
        };

        Self {
            steps: vec![
                DeployStep::new(BFactory, Strategy::Plain(vec![])),
                DeployStep::new(BPool, Strategy::pool_factory()),
                DeployStep::new(
                    Coin,
                    literals(vec![
                        string(&config.coin_name),
                        string(&config.coin_symbol),
                        uint(config.coin_decimals.into()),
                    ]),
                ),
                DeployStep::new(Long, position(&config.long_name, &config.long_symbol)),
                DeployStep::new(Short, position(&config.short_name, &config.short_symbol)),
                DeployStep::new(
                    Vault,
                    Strategy::Dependent(vec![
                        string(&config.vault_name),
                        uint(config.vault_version.into()),
                        ArgSource::Deployed(Coin),
                        ArgSource::Deployed(Long),
                        ArgSource::Deployed(Short),
                        ArgSource::Admin,
                        ArgSource::Deployed(BPool),
                        uint(config.cap),
                        uint(config.floor),
                        uint(config.collateral_per_unit),
                        uint(config.fee_rate),
                    ]),
                ),
                DeployStep::new(YController, Strategy::Dependent(vec![ArgSource::Admin])),
                DeployStep::new(
                    YVault,
                    Strategy::Dependent(vec![
                        ArgSource::Deployed(Coin),
                        ArgSource::Deployed(YController),
                    ]),
                ),
                DeployStep::new(
                    PoolController,
                    Strategy::Dependent(vec![
                        ArgSource::Deployed(YController),
                        ArgSource::Deployed(Coin),
                        ArgSource::Deployed(BPool),
                        ArgSource::Deployed(Vault),
                        ArgSource::Deployed(Long),
                        ArgSource::Deployed(Short),
                    ]),
                ),
            ],
        }
    }

    /// The plan of a reconnection: contracts with a recorded address are
    /// bound as they are and everything else is deployed.
    pub fn connect(
        cache: &Addresses,
        args: &ConstructorArgs,
        network: Network,
        artifacts: &Artifacts,
    ) -> Result<Self> {
        let steps = ContractName::ALL
            .into_iter()
            .map(|name| {
                let strategy = match cache.get(name) {
                    Some(address) => Strategy::Existing(address),
                    None => match reconnect_recipe(name) {
                        Recipe::Factory => Strategy::pool_factory(),
                        Recipe::Dependent(slots) => Strategy::Dependent(
                            slots
                                .iter()
                                .map(|slot| match slot {
                                    Slot::Admin => ArgSource::Admin,
                                    Slot::Contract(name) => ArgSource::Deployed(*name),
                                })
                                .collect(),
                        ),
                        Recipe::Literal => {
                            let inputs = artifacts.get(name)?.constructor_inputs();
                            Strategy::Plain(args.for_contract(network.args_key(), name, &inputs)?)
                        }
                    },
                };
                Ok(DeployStep::new(name, strategy))
            })
            .collect::<Result<_>>()?;
        Ok(Self { steps })
    }

    /// The plan of a bind-only reconnection: every contract must already
    /// have an address, so running it sends no transactions.
    pub fn bind(cache: &Addresses, path: &Path) -> Result<Self> {
        let steps = ContractName::ALL
            .into_iter()
            .map(|name| match cache.get(name) {
                Some(address) => Ok(DeployStep::new(name, Strategy::Existing(address))),
                None => Err(DeployError::NotDeployed {
                    name,
                    path: path.to_path_buf(),
                }
                .into()),
            })
            .collect::<Result<_>>()?;
        Ok(Self { steps })
    }

    /// Checks that every step only depends on contracts produced by earlier
    /// steps.
    pub fn validate(&self) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            for dependency in step.strategy.dependencies() {
                if !self.steps[..i].iter().any(|prior| prior.name == dependency) {
                    return Err(DeployError::UnresolvedDependency {
                        contract: step.name,
                        dependency,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// The contracts this plan will send transactions for.
    pub fn deployments(&self) -> Vec<ContractName> {
        self.steps
            .iter()
            .filter(|step| step.strategy.is_deployment())
            .map(|step| step.name)
            .collect()
    }
}
