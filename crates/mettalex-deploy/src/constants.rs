use std::{env, path::PathBuf};

/// The gas limit used for configuration calls, approvals, deposits and swaps.
pub const SETTER_GAS: u64 = 1_000_000;

/// The gas limit used when the factory creates a new pool.
pub const POOL_CREATION_GAS: u64 = 5_000_000;

/// The gas limit used for y-vault withdrawals.
pub const WITHDRAW_GAS: u64 = 5_000_000;

/// The gas limit used when the y-vault pushes collateral to its strategy.
pub const EARN_GAS: u64 = 5_000_000;

// Deployment files, relative to the working directory unless overridden.
pub const ADDRESS_FILE: &str = "contract_address.json";
pub const CACHE_FILE: &str = "contract_cache.json";
pub const ARGS_FILE: &str = "args.json";

pub const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
pub const KOVAN_RPC_URL: &str = "https://kovan.infura.io/v3";
pub const BSC_TESTNET_RPC_URL: &str = "https://data-seed-prebsc-1-s1.binance.org:8545/";

pub const KOVAN_CHAIN_ID: u64 = 42;
pub const BSC_TESTNET_CHAIN_ID: u64 = 97;

pub const ENV_PREFIX: &str = "METTALEX_";

// The pool factory's creation call and the event carrying the new pool.
pub const NEW_POOL_METHOD: &str = "newBPool";
pub const NEW_POOL_EVENT: &str = "LOG_NEW_POOL";
pub const NEW_POOL_ARGUMENT: &str = "pool";

/// Spot prices reported by the pool are fixed point numbers with this many
/// decimals.
pub const SPOT_PRICE_DECIMALS: u32 = 18;

// Positions of the price bounds among the Vault's constructor arguments.
pub const VAULT_CAP_POSITION: usize = 7;
pub const VAULT_FLOOR_POSITION: usize = 8;

lazy_static! {
    // The Ethereum URL the end-to-end tests connect to.
    pub static ref TEST_ETHEREUM_URL: String =
        env::var("METTALEX_ETHEREUM_URL").unwrap_or_else(|_| LOCAL_RPC_URL.to_string());

    // The directory holding the compiled contract families used by the
    // end-to-end tests.
    pub static ref TEST_BUILD_DIR: PathBuf = env::var("METTALEX_BUILD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
}
