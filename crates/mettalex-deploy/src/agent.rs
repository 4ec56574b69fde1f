use std::sync::Arc;

use ethers::{
    providers::Middleware,
    types::{Address, TransactionReceipt, U256},
    utils::{format_units, parse_units, ParseUnits},
};
use eyre::{eyre, Result};
use tracing::info;

use crate::{
    chain::deploy::ContractHandle,
    constants::{EARN_GAS, SETTER_GAS, SPOT_PRICE_DECIMALS, WITHDRAW_GAS},
};

/// A pool spot price: the amount of the input token needed for one unit of
/// the output token, as an 18 decimal fixed point number of native units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpotPrice {
    pub raw: U256,
    pub in_decimals: u8,
    pub out_decimals: u8,
}

impl SpotPrice {
    /// The price in whole tokens, accounting for both tokens' decimals.
    pub fn to_human(&self) -> Result<String> {
        let shift = i64::from(SPOT_PRICE_DECIMALS) + i64::from(self.in_decimals)
            - i64::from(self.out_decimals);
        if shift >= 0 {
            Ok(format_units(self.raw, shift as u32)?)
        } else {
            let scale = U256::exp10((-shift) as usize);
            let scaled = self
                .raw
                .checked_mul(scale)
                .ok_or_else(|| eyre!("spot price overflows"))?;
            Ok(scaled.to_string())
        }
    }
}

/// Scales a whole-token amount to native units. Negative amounts are
/// refused since they would wrap around to huge unsigned values.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256> {
    match parse_units(amount, u32::from(decimals))? {
        ParseUnits::U256(native) => Ok(native),
        ParseUnits::I256(_) => Err(eyre!("amount {} is negative", amount)),
    }
}

/// The minimum output accepted when none is given: 90% of what the spot
/// price promises. Works on native units so that
/// `qty_in / spot * 0.9 == qty_in_native * 1e18 * 9 / (spot_raw * 10)`.
pub fn default_min_qty_out(qty_in: U256, spot_raw: U256) -> Result<U256> {
    if spot_raw.is_zero() {
        return Err(eyre!("pool reports a zero spot price"));
    }
    let numerator = qty_in
        .checked_mul(U256::exp10(SPOT_PRICE_DECIMALS as usize))
        .and_then(|n| n.checked_mul(U256::from(9u64)))
        .ok_or_else(|| eyre!("input quantity overflows"))?;
    let denominator = spot_raw
        .checked_mul(U256::from(10u64))
        .ok_or_else(|| eyre!("spot price overflows"))?;
    Ok(numerator / denominator)
}

/// The maximum spot price accepted after the swap when none is given: the
/// current price plus the same 10% tolerance as the minimum output.
pub fn default_max_price(spot_raw: U256) -> Result<U256> {
    let scaled = spot_raw
        .checked_mul(U256::from(10u64))
        .ok_or_else(|| eyre!("spot price overflows"))?;
    Ok(scaled / U256::from(9u64))
}

/// Resolves the minimum swap output in native units of the output token.
/// An explicit amount is scaled by the output token's decimals; otherwise
/// the default is derived from the spot price, which must then be known.
pub fn resolve_min_qty_out(
    min_qty_out: Option<&str>,
    out_decimals: u8,
    qty_in: U256,
    spot_raw: Option<U256>,
) -> Result<U256> {
    match min_qty_out {
        Some(min_qty_out) => parse_amount(min_qty_out, out_decimals),
        None => {
            let spot_raw = spot_raw.ok_or_else(|| eyre!("spot price wasn't fetched"))?;
            default_min_qty_out(qty_in, spot_raw)
        }
    }
}

/// An account interacting with a deployment. Contract handles passed in are
/// rebound to the agent's client, so any account can act on a deployment
/// made by another.
pub struct Agent<M> {
    client: Arc<M>,
    address: Address,
}

impl<M: Middleware + 'static> Agent<M> {
    pub fn new(client: Arc<M>, address: Address) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn bind(&self, handle: &ContractHandle<M>) -> ContractHandle<M> {
        ContractHandle::bind(
            handle.name,
            handle.address(),
            handle.abi().clone(),
            self.client.clone(),
        )
    }

    pub async fn decimals(&self, token: &ContractHandle<M>) -> Result<u8> {
        token.read("decimals", ()).await
    }

    pub async fn balance_of(&self, token: &ContractHandle<M>) -> Result<U256> {
        token.read("balanceOf", self.address).await
    }

    /// Deposits collateral into the y-vault. `amount` is in whole coins.
    /// Returns the deposited amount in native units.
    pub async fn deposit(
        &self,
        y_vault: &ContractHandle<M>,
        coin: &ContractHandle<M>,
        amount: &str,
    ) -> Result<U256> {
        let (y_vault, coin) = (self.bind(y_vault), self.bind(coin));
        let decimals = self.decimals(&coin).await?;
        let amount_native = parse_amount(amount, decimals)?;

        coin.transact("approve", (y_vault.address(), amount_native), SETTER_GAS)
            .await?;
        y_vault
            .transact("deposit", amount_native, SETTER_GAS)
            .await?;
        info!(depositor = ?self.address, amount, "deposited in y-vault");

        Ok(amount_native)
    }

    /// Redeems y-vault shares. `shares` is in whole shares.
    pub async fn withdraw(&self, y_vault: &ContractHandle<M>, shares: &str) -> Result<U256> {
        let y_vault = self.bind(y_vault);
        let decimals = self.decimals(&y_vault).await?;
        let shares_native = parse_amount(shares, decimals)?;

        y_vault
            .transact("withdraw", shares_native, WITHDRAW_GAS)
            .await?;
        info!(owner = ?self.address, shares, "withdrew from y-vault");

        Ok(shares_native)
    }

    /// Pushes the y-vault's idle collateral to its strategy.
    pub async fn earn(&self, y_vault: &ContractHandle<M>) -> Result<()> {
        self.bind(y_vault).transact("earn", (), EARN_GAS).await?;
        info!(caller = ?self.address, "liquidity supplied to the pool");
        Ok(())
    }

    pub async fn get_spot_price(
        &self,
        pool: &ContractHandle<M>,
        tok_in: &ContractHandle<M>,
        tok_out: &ContractHandle<M>,
        include_fee: bool,
    ) -> Result<SpotPrice> {
        let method = if include_fee {
            "getSpotPrice"
        } else {
            "getSpotPriceSansFee"
        };
        let raw = pool
            .read(method, (tok_in.address(), tok_out.address()))
            .await?;
        Ok(SpotPrice {
            raw,
            in_decimals: self.decimals(tok_in).await?,
            out_decimals: self.decimals(tok_out).await?,
        })
    }

    /// Swaps an exact amount of `tok_in` (in whole tokens) for `tok_out`.
    /// Without explicit limits the swap tolerates 10% slippage against the
    /// current fee-less spot price.
    pub async fn swap_amount_in(
        &self,
        pool: &ContractHandle<M>,
        tok_in: &ContractHandle<M>,
        qty_in: &str,
        tok_out: &ContractHandle<M>,
        min_qty_out: Option<&str>,
        max_price: Option<U256>,
    ) -> Result<TransactionReceipt> {
        let (pool, tok_in, tok_out) = (self.bind(pool), self.bind(tok_in), self.bind(tok_out));
        let in_decimals = self.decimals(&tok_in).await?;
        let qty_in_native = parse_amount(qty_in, in_decimals)?;
        let out_decimals = self.decimals(&tok_out).await?;
        // Refuse a malformed minimum before anything is sent.
        if let Some(min_qty_out) = min_qty_out {
            parse_amount(min_qty_out, out_decimals)?;
        }

        let allowance: U256 = tok_in
            .read("allowance", (self.address, pool.address()))
            .await?;
        if qty_in_native > allowance {
            tok_in
                .transact("approve", (pool.address(), qty_in_native), SETTER_GAS)
                .await?;
        }

        let spot = if min_qty_out.is_none() || max_price.is_none() {
            Some(
                self.get_spot_price(&pool, &tok_in, &tok_out, false)
                    .await?,
            )
        } else {
            None
        };
        let min_qty_out_native = resolve_min_qty_out(
            min_qty_out,
            out_decimals,
            qty_in_native,
            spot.map(|spot| spot.raw),
        )?;
        if min_qty_out.is_none() {
            info!(min_qty_out = %min_qty_out_native, "minimum output not specified");
        }
        let max_price = match max_price {
            Some(max_price) => max_price,
            None => {
                let spot_raw = spot
                    .map(|spot| spot.raw)
                    .ok_or_else(|| eyre!("spot price wasn't fetched"))?;
                let max = default_max_price(spot_raw)?;
                info!(max_price = %max, "max price not specified");
                max
            }
        };
        if let Some(spot) = spot {
            info!(spot = %spot.to_human()?, "spot price");
        }

        info!(
            trader = ?self.address,
            tok_in = %tok_in.name,
            tok_out = %tok_out.name,
            qty_in,
            "swapping"
        );
        pool.transact(
            "swapExactAmountIn",
            (
                tok_in.address(),
                qty_in_native,
                tok_out.address(),
                min_qty_out_native,
                max_price,
            ),
            SETTER_GAS,
        )
        .await
    }
}
