//! Read-only reports on a deployment: the vault's parameters and the token
//! balances of an address.
use ethers::{
    providers::Middleware,
    types::{Address, I256, U256},
    utils::format_units,
};
use eyre::{eyre, Result};
use mettalex_addresses::ContractName;
use tracing::warn;

use crate::chain::deploy::{ContractHandle, DeployedSystem, Deployer};

/// Prices derived from the vault's parameters. The long and short prices
/// are signed so that a vault whose floor isn't below its cap shows up as
/// such instead of wrapping around.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultPrices {
    /// Collateral backing one long and one short token, in position token
    /// ticks.
    pub pair_value: String,
    pub long_price: I256,
    pub short_price: I256,
    pub inverted: bool,
}

impl VaultPrices {
    pub fn new(
        floor: U256,
        cap: U256,
        spot: U256,
        collateral_per_unit: U256,
        coin_decimals: u8,
        position_decimals: u8,
    ) -> Result<Self> {
        let pair_value = if position_decimals >= coin_decimals {
            collateral_per_unit
                .checked_mul(U256::exp10(usize::from(position_decimals - coin_decimals)))
                .ok_or_else(|| eyre!("collateral per unit overflows"))?
                .to_string()
        } else {
            format_units(
                collateral_per_unit,
                u32::from(coin_decimals - position_decimals),
            )?
        };
        Ok(Self {
            pair_value,
            long_price: I256::from_raw(spot) - I256::from_raw(floor),
            short_price: I256::from_raw(cap) - I256::from_raw(spot),
            inverted: floor >= cap,
        })
    }
}

/// The vault's configuration as read from chain.
pub struct VaultDetails<M> {
    pub vault: ContractHandle<M>,
    pub coin: ContractHandle<M>,
    pub long: ContractHandle<M>,
    pub short: ContractHandle<M>,
    pub name: String,
    pub floor: U256,
    pub cap: U256,
    pub spot: U256,
    pub collateral_per_unit: U256,
}

impl<M: Middleware + 'static> VaultDetails<M> {
    /// Reads the details of the vault at `address`, binding the tokens the
    /// vault reports rather than the ones recorded in the address file.
    pub async fn fetch(deployer: &Deployer<M>, address: Address) -> Result<Self> {
        let vault = deployer.bind(ContractName::Vault, address)?;
        let coin = deployer.bind(ContractName::Coin, vault.read("collateralToken", ()).await?)?;
        let long = deployer.bind(ContractName::Long, vault.read("longPositionToken", ()).await?)?;
        let short =
            deployer.bind(ContractName::Short, vault.read("shortPositionToken", ()).await?)?;
        Ok(Self {
            name: vault.read("contractName", ()).await?,
            floor: vault.read("priceFloor", ()).await?,
            cap: vault.read("priceCap", ()).await?,
            spot: vault.read("priceSpot", ()).await?,
            collateral_per_unit: vault.read("collateralPerUnit", ()).await?,
            vault,
            coin,
            long,
            short,
        })
    }

    pub async fn prices(&self) -> Result<VaultPrices> {
        let coin_decimals: u8 = self.coin.read("decimals", ()).await?;
        let long_decimals: u8 = self.long.read("decimals", ()).await?;
        VaultPrices::new(
            self.floor,
            self.cap,
            self.spot,
            self.collateral_per_unit,
            coin_decimals,
            long_decimals,
        )
    }

    pub async fn print(&self) -> Result<()> {
        let prices = self.prices().await?;
        println!("{}", self.name);
        println!("Coin: {:?}", self.coin.address());
        println!("Long: {:?}", self.long.address());
        println!("Short: {:?}", self.short.address());
        println!("Vault: {:?}", self.vault.address());
        println!(
            "Floor: {}, Cap: {} -> Collateral Per Unit {}",
            self.floor, self.cap, self.collateral_per_unit
        );
        println!("Value of 1 position token pair = {}", prices.pair_value);
        println!("Current spot price: {}", self.spot);
        println!("Long token spot price: {}", prices.long_price);
        println!("Short token spot price: {}", prices.short_price);
        if prices.inverted {
            warn!(
                floor = %self.floor,
                cap = %self.cap,
                "vault floor isn't below its cap"
            );
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balances {
    pub coin: U256,
    pub long: U256,
    pub short: U256,
    pub y_vault: U256,
}

/// Formats token balances using each token's own decimals.
pub struct BalanceReporter<M> {
    coin: ContractHandle<M>,
    long: ContractHandle<M>,
    short: ContractHandle<M>,
    y_vault: ContractHandle<M>,
    decimals: [u8; 4],
}

impl<M: Middleware + 'static> BalanceReporter<M> {
    pub async fn new(system: &DeployedSystem<M>) -> Result<Self> {
        let mut decimals = [0; 4];
        for (i, token) in [&system.coin, &system.long, &system.short, &system.y_vault]
            .into_iter()
            .enumerate()
        {
            decimals[i] = token.read("decimals", ()).await?;
        }
        Ok(Self {
            coin: system.coin.clone(),
            long: system.long.clone(),
            short: system.short.clone(),
            y_vault: system.y_vault.clone(),
            decimals,
        })
    }

    pub async fn balances(&self, address: Address) -> Result<Balances> {
        Ok(Balances {
            coin: self.coin.read("balanceOf", address).await?,
            long: self.long.read("balanceOf", address).await?,
            short: self.short.read("balanceOf", address).await?,
            y_vault: self.y_vault.read("balanceOf", address).await?,
        })
    }

    pub fn format(&self, balances: &Balances) -> Result<[String; 4]> {
        let [coin, long, short, y_vault] = self.decimals;
        Ok([
            format_units(balances.coin, u32::from(coin))?,
            format_units(balances.long, u32::from(long))?,
            format_units(balances.short, u32::from(short))?,
            format_units(balances.y_vault, u32::from(y_vault))?,
        ])
    }

    pub async fn print(&self, address: Address, label: &str) -> Result<()> {
        let [coin, long, short, y_vault] = self.format(&self.balances(address).await?)?;
        println!();
        println!("{} ({:?}) has {} vault shares", label, address, y_vault);
        println!("  {} coin, {} LTK, {} STK", coin, long, short);
        println!();
        Ok(())
    }
}
