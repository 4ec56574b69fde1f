//! Post-deployment configuration. Every call reads the affected state,
//! sends the transaction, waits for it to be mined and reads the state
//! again so that the change can be reported.
use std::fmt::Debug;

use ethers::{
    providers::Middleware,
    types::{Address, U256},
};
use eyre::Result;
use mettalex_addresses::ContractName;
use tracing::info;

use super::deploy::{ContractHandle, DeployedSystem, Deployer};
use crate::constants::SETTER_GAS;

/// A piece of on-chain state before and after a configuration call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange<T> {
    pub before: T,
    pub after: T,
}

impl<T: Debug + PartialEq> StateChange<T> {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    fn report(self, contract: ContractName, what: &str) -> Self {
        info!(
            %contract,
            before = ?self.before,
            after = ?self.after,
            "{} {}",
            what,
            if self.changed() { "changed" } else { "unchanged" }
        );
        self
    }
}

/// Sets whether `address` may mint and burn the position token.
pub async fn set_token_whitelist<M: Middleware + 'static>(
    token: &ContractHandle<M>,
    address: Address,
    state: bool,
) -> Result<StateChange<bool>> {
    let before = token.read("whitelist", address).await?;
    token
        .transact("setWhitelist", (address, state), SETTER_GAS)
        .await?;
    let after = token.read("whitelist", address).await?;
    Ok(StateChange { before, after }.report(token.name, "whitelist"))
}

/// Allows the vault to mint both position tokens.
pub async fn whitelist_vault<M: Middleware + 'static>(
    vault: &ContractHandle<M>,
    long: &ContractHandle<M>,
    short: &ContractHandle<M>,
) -> Result<(StateChange<bool>, StateChange<bool>)> {
    let long = set_token_whitelist(long, vault.address(), true).await?;
    let short = set_token_whitelist(short, vault.address(), true).await?;
    Ok((long, short))
}

/// Points the yield controller's strategy for `token` at `strategy`.
pub async fn set_strategy<M: Middleware + 'static>(
    y_controller: &ContractHandle<M>,
    token: Address,
    strategy: Address,
) -> Result<StateChange<Address>> {
    let before = y_controller.read("strategies", token).await?;
    y_controller
        .transact("setStrategy", (token, strategy), SETTER_GAS)
        .await?;
    let after = y_controller.read("strategies", token).await?;
    Ok(StateChange { before, after }.report(y_controller.name, "strategy"))
}

/// Registers the y-vault for `token` with the yield controller.
pub async fn set_yvault_controller<M: Middleware + 'static>(
    y_controller: &ContractHandle<M>,
    y_vault: Address,
    token: Address,
) -> Result<StateChange<Address>> {
    let before = y_controller.read("vaults", token).await?;
    y_controller
        .transact("setVault", (token, y_vault), SETTER_GAS)
        .await?;
    let after = y_controller.read("vaults", token).await?;
    Ok(StateChange { before, after }.report(y_controller.name, "y-vault"))
}

/// Hands control of the pool to `controller`.
pub async fn set_balancer_controller<M: Middleware + 'static>(
    pool: &ContractHandle<M>,
    controller: Address,
) -> Result<StateChange<Address>> {
    let before = pool.read("getController", ()).await?;
    pool.transact("setController", controller, SETTER_GAS)
        .await?;
    let after = pool.read("getController", ()).await?;
    Ok(StateChange { before, after }.report(pool.name, "controller"))
}

/// Makes `strategy` the vault's automated market maker, which trades
/// without fees.
pub async fn set_autonomous_market_maker<M: Middleware + 'static>(
    vault: &ContractHandle<M>,
    strategy: Address,
) -> Result<StateChange<Address>> {
    let before = vault.read("ammPoolController", ()).await?;
    vault
        .transact("updateAMMPoolController", strategy, SETTER_GAS)
        .await?;
    let after = vault.read("ammPoolController", ()).await?;
    Ok(StateChange { before, after }.report(vault.name, "amm pool controller"))
}

pub async fn set_price<M: Middleware + 'static>(
    vault: &ContractHandle<M>,
    price: U256,
) -> Result<StateChange<U256>> {
    let before = vault.read("priceSpot", ()).await?;
    vault.transact("updateSpot", price, SETTER_GAS).await?;
    let after = vault.read("priceSpot", ()).await?;
    Ok(StateChange { before, after }.report(vault.name, "spot price"))
}

/// Moves control of the pool from `old_strategy` to `new_strategy`. Only
/// the current controller can do this, so the call goes through the old
/// strategy.
pub async fn update_pool_controller<M: Middleware + 'static>(
    pool: &ContractHandle<M>,
    old_strategy: &ContractHandle<M>,
    new_strategy: Address,
) -> Result<StateChange<Address>> {
    let before = pool.read("getController", ()).await?;
    old_strategy
        .transact("updatePoolController", new_strategy, SETTER_GAS)
        .await?;
    let after = pool.read("getController", ()).await?;
    Ok(StateChange { before, after }.report(pool.name, "controller"))
}

/// Wires a deployment together. The price is only set when given, since a
/// reconnected vault may already have one.
pub async fn full_setup<M: Middleware + 'static>(
    system: &DeployedSystem<M>,
    price: Option<U256>,
) -> Result<()> {
    info!("whitelisting the vault to mint position tokens");
    whitelist_vault(&system.vault, &system.long, &system.short).await?;
    info!("setting strategy");
    set_strategy(
        &system.y_controller,
        system.coin.address(),
        system.strategy.address(),
    )
    .await?;
    info!("setting y-vault controller");
    set_yvault_controller(
        &system.y_controller,
        system.y_vault.address(),
        system.coin.address(),
    )
    .await?;
    info!("setting balancer controller");
    set_balancer_controller(&system.pool, system.strategy.address()).await?;
    info!("setting vault amm");
    set_autonomous_market_maker(&system.vault, system.strategy.address()).await?;
    if let Some(price) = price {
        set_price(&system.vault, price).await?;
    }
    Ok(())
}

/// Binds the strategy ABI to an arbitrary address.
pub fn connect_strategy<M: Middleware + 'static>(
    deployer: &Deployer<M>,
    address: Address,
) -> Result<ContractHandle<M>> {
    deployer.bind(ContractName::PoolController, address)
}

/// Replaces the deployment's strategy with a freshly deployed one. The old
/// strategy stays on chain but no longer controls anything.
pub async fn upgrade_strategy<M: Middleware + 'static>(
    deployer: &Deployer<M>,
    system: &DeployedSystem<M>,
) -> Result<ContractHandle<M>> {
    let new_strategy = deployer
        .deploy_contract(
            ContractName::PoolController,
            [
                system.y_controller.address(),
                system.coin.address(),
                system.pool.address(),
                system.vault.address(),
                system.long.address(),
                system.short.address(),
            ]
            .into_iter()
            .map(ethers::abi::Token::Address)
            .collect(),
        )
        .await?;
    set_strategy(
        &system.y_controller,
        system.coin.address(),
        new_strategy.address(),
    )
    .await?;
    update_pool_controller(&system.pool, &system.strategy, new_strategy.address()).await?;
    info!(
        old = ?system.strategy.address(),
        new = ?new_strategy.address(),
        "strategy upgraded"
    );
    connect_strategy(deployer, new_strategy.address())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change() {
        let change = StateChange {
            before: Address::zero(),
            after: Address::from_low_u64_be(1),
        };
        assert!(change.changed());
        let change = change.report(ContractName::BPool, "controller");
        assert_eq!(change.after, Address::from_low_u64_be(1));

        let unchanged = StateChange {
            before: true,
            after: true,
        };
        assert!(!unchanged.changed());
    }
}
