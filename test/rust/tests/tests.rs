use std::{collections::BTreeSet, fs, sync::Arc};

use ethers::{
    providers::Middleware,
    types::{Address, U256},
};
use eyre::Result;
use mettalex_addresses::{Addresses, ContractName};
use mettalex_deploy::{
    agent::{parse_amount, Agent},
    chain::{
        artifacts::{vault_bound_order, ArtifactStore, BoundOrder},
        deploy::Deployer,
        wiring::{full_setup, set_price, upgrade_strategy, whitelist_vault},
        Account, Chain, ChainConfig, Network, UnlockedClient,
    },
    config::{DeployConfig, DeploymentFiles},
    constants::{TEST_BUILD_DIR, TEST_ETHEREUM_URL},
};
use tempfile::TempDir;

struct Fixture {
    chain: Chain,
    admin: Address,
    deployer: Deployer<UnlockedClient>,
    dir: TempDir,
}

impl Fixture {
    async fn new() -> Result<Self> {
        // Set up the logger.
        let _ = tracing_subscriber::fmt().try_init();

        let chain = Chain::connect(&ChainConfig {
            rpc_url: Some(TEST_ETHEREUM_URL.to_string()),
            ..ChainConfig::new(Network::Local)
        })
        .await?;
        let admin = match chain.resolve_account(None, "admin").await? {
            Account::Unlocked(address) => address,
            Account::Local(_) => eyre::bail!("local chains use unlocked accounts"),
        };
        let artifacts = ArtifactStore::new(TEST_BUILD_DIR.as_path()).load_all()?;
        let deployer = Deployer::new(chain.unlocked_client(admin), admin, artifacts);

        Ok(Self {
            chain,
            admin,
            deployer,
            dir: tempfile::tempdir()?,
        })
    }

    fn files(&self) -> DeploymentFiles {
        DeploymentFiles {
            address_file: self.dir.path().join("contract_address.json"),
            cache_file: self.dir.path().join("contract_cache.json"),
            args_file: self.dir.path().join("contract_args.json"),
        }
    }
}

#[ignore]
#[tokio::test]
async fn test_fresh_deploy() -> Result<()> {
    let fixture = Fixture::new().await?;
    let files = fixture.files();

    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &files.cache_file)
        .await?;

    let addresses = system.addresses();
    assert!(addresses.is_complete());
    let distinct = addresses
        .iter()
        .filter_map(|(_, address)| address)
        .collect::<BTreeSet<_>>();
    assert_eq!(distinct.len(), ContractName::ALL.len());
    assert!(!distinct.contains(&Address::zero()));

    assert_eq!(Addresses::load(&files.cache_file)?, Some(addresses));

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_pool_comes_from_factory_event() -> Result<()> {
    let fixture = Fixture::new().await?;
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &fixture.files().cache_file)
        .await?;

    let is_pool: bool = system
        .factory
        .read("isBPool", system.pool.address())
        .await?;
    assert!(is_pool);
    let controller: Address = system.pool.read("getController", ()).await?;
    assert_eq!(controller, fixture.admin);

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_whitelist_vault() -> Result<()> {
    let fixture = Fixture::new().await?;
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &fixture.files().cache_file)
        .await?;

    let (long, short) = whitelist_vault(&system.vault, &system.long, &system.short).await?;
    assert!(long.after && short.after);
    for token in [&system.long, &system.short] {
        let whitelisted: bool = token.read("whitelist", system.vault.address()).await?;
        assert!(whitelisted);
    }

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_deposit() -> Result<()> {
    let fixture = Fixture::new().await?;
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &fixture.files().cache_file)
        .await?;
    full_setup(&system, None).await?;

    let agent = Agent::new(fixture.deployer.client(), fixture.admin);
    let coin_before = agent.balance_of(&system.coin).await?;
    let shares_before = agent.balance_of(&system.y_vault).await?;

    let deposited = agent.deposit(&system.y_vault, &system.coin, "10").await?;
    let decimals = agent.decimals(&system.coin).await?;
    assert_eq!(deposited, U256::from(10u64) * U256::exp10(usize::from(decimals)));

    assert_eq!(agent.balance_of(&system.coin).await?, coin_before - deposited);
    assert!(agent.balance_of(&system.y_vault).await? > shares_before);

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_reconnect_sends_nothing() -> Result<()> {
    let fixture = Fixture::new().await?;
    let files = fixture.files();
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &files.cache_file)
        .await?;

    system.addresses().save(&files.address_file)?;
    fs::write(&files.args_file, r#"{ "development": {} }"#)?;

    let client: Arc<UnlockedClient> = fixture.deployer.client();
    let nonce = client.get_transaction_count(fixture.admin, None).await?;
    let reconnected = fixture
        .deployer
        .connect_deployed(fixture.chain.network(), &files)
        .await?
        .ok_or_else(|| eyre::eyre!("nothing to reconnect to"))?;
    assert_eq!(client.get_transaction_count(fixture.admin, None).await?, nonce);
    assert_eq!(reconnected.addresses(), system.addresses());
    assert_eq!(Addresses::load(&files.cache_file)?, Some(system.addresses()));

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_vault_bounds_match_constructor() -> Result<()> {
    let fixture = Fixture::new().await?;
    let config = DeployConfig::default();
    let system = fixture
        .deployer
        .deploy(&config, &fixture.files().cache_file)
        .await?;

    let cap: U256 = system.vault.read("priceCap", ()).await?;
    let floor: U256 = system.vault.read("priceFloor", ()).await?;
    let vault = fixture.deployer.artifacts().get(ContractName::Vault)?;
    match vault_bound_order(vault) {
        BoundOrder::Matches => {
            assert_eq!(cap, config.cap);
            assert_eq!(floor, config.floor);
        }
        BoundOrder::Swapped => {
            assert_eq!(cap, config.floor);
            assert_eq!(floor, config.cap);
        }
        BoundOrder::Unknown => {}
    }

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_set_price() -> Result<()> {
    let fixture = Fixture::new().await?;
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &fixture.files().cache_file)
        .await?;

    let price = U256::from(2_500_000u64);
    let change = set_price(&system.vault, price).await?;
    assert_eq!(change.after, price);
    let spot: U256 = system.vault.read("priceSpot", ()).await?;
    assert_eq!(spot, price);

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_full_setup_and_strategy_upgrade() -> Result<()> {
    let fixture = Fixture::new().await?;
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &fixture.files().cache_file)
        .await?;
    let price = U256::from(2_500_000u64);
    full_setup(&system, Some(price)).await?;

    let coin = system.coin.address();
    let old_strategy = system.strategy.address();
    let strategy: Address = system.y_controller.read("strategies", coin).await?;
    assert_eq!(strategy, old_strategy);
    let y_vault: Address = system.y_controller.read("vaults", coin).await?;
    assert_eq!(y_vault, system.y_vault.address());
    let controller: Address = system.pool.read("getController", ()).await?;
    assert_eq!(controller, old_strategy);
    let amm: Address = system.vault.read("ammPoolController", ()).await?;
    assert_eq!(amm, old_strategy);
    let spot: U256 = system.vault.read("priceSpot", ()).await?;
    assert_eq!(spot, price);

    let new_strategy = upgrade_strategy(&fixture.deployer, &system).await?;
    assert_ne!(new_strategy.address(), old_strategy);
    let strategy: Address = system.y_controller.read("strategies", coin).await?;
    assert_eq!(strategy, new_strategy.address());
    let controller: Address = system.pool.read("getController", ()).await?;
    assert_eq!(controller, new_strategy.address());

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_swap_amount_in() -> Result<()> {
    let fixture = Fixture::new().await?;
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &fixture.files().cache_file)
        .await?;
    full_setup(&system, Some(U256::from(2_500_000u64))).await?;

    // Seed the pool through the strategy.
    let agent = Agent::new(fixture.deployer.client(), fixture.admin);
    agent.deposit(&system.y_vault, &system.coin, "1000").await?;
    agent.earn(&system.y_vault).await?;

    let coin_decimals = agent.decimals(&system.coin).await?;
    let long_decimals = agent.decimals(&system.long).await?;
    let qty_in = parse_amount("1", coin_decimals)?;
    let allowance = |agent: &Agent<UnlockedClient>| {
        let coin = system.coin.clone();
        let (owner, spender) = (agent.address(), system.pool.address());
        async move { coin.read::<_, U256>("allowance", (owner, spender)).await }
    };

    // Default limits: the approval is sent and fully spent.
    let long_before = agent.balance_of(&system.long).await?;
    agent
        .swap_amount_in(&system.pool, &system.coin, "1", &system.long, None, None)
        .await?;
    assert!(agent.balance_of(&system.long).await? > long_before);
    assert_eq!(allowance(&agent).await?, U256::zero());

    // An existing allowance covers the swap, so no new approval is sent
    // and only the input amount is spent from it.
    system
        .coin
        .transact(
            "approve",
            (system.pool.address(), qty_in * U256::from(2u64)),
            1_000_000,
        )
        .await?;
    let long_before = agent.balance_of(&system.long).await?;
    agent
        .swap_amount_in(
            &system.pool,
            &system.coin,
            "1",
            &system.long,
            Some("0.000001"),
            Some(U256::MAX),
        )
        .await?;
    assert_eq!(allowance(&agent).await?, qty_in);
    let received = agent.balance_of(&system.long).await? - long_before;
    assert!(received >= parse_amount("0.000001", long_decimals)?);

    // A negative amount is refused before anything is sent.
    let nonce = fixture
        .deployer
        .client()
        .get_transaction_count(fixture.admin, None)
        .await?;
    assert!(agent
        .swap_amount_in(&system.pool, &system.coin, "-1", &system.long, None, None)
        .await
        .is_err());
    assert!(agent
        .deposit(&system.y_vault, &system.coin, "-1")
        .await
        .is_err());
    assert_eq!(
        fixture
            .deployer
            .client()
            .get_transaction_count(fixture.admin, None)
            .await?,
        nonce
    );

    Ok(())
}

#[ignore]
#[tokio::test]
async fn test_bind_sends_nothing_and_requires_every_address() -> Result<()> {
    let fixture = Fixture::new().await?;
    let files = fixture.files();
    let system = fixture
        .deployer
        .deploy(&DeployConfig::default(), &files.cache_file)
        .await?;

    let client = fixture.deployer.client();
    let nonce = client.get_transaction_count(fixture.admin, None).await?;

    // A record missing the pool is refused rather than completed.
    let mut missing = system.addresses();
    missing.pool = None;
    missing.save(&files.address_file)?;
    assert!(fixture.deployer.bind_deployed(&files.address_file).await.is_err());

    system.addresses().save(&files.address_file)?;
    let bound = fixture.deployer.bind_deployed(&files.address_file).await?;
    assert_eq!(bound.addresses(), system.addresses());
    assert_eq!(client.get_transaction_count(fixture.admin, None).await?, nonce);

    Ok(())
}
