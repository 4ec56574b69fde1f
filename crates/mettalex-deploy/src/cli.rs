use std::{path::PathBuf, str::FromStr, sync::Arc};

use clap::{Parser, ValueEnum};
use ethers::{providers::Middleware, signers::Signer, types::{Address, U256}};
use eyre::{eyre, Result};
use tracing::info;

use crate::{
    agent::Agent,
    chain::{
        artifacts::{ArtifactStore, Artifacts},
        deploy::{DeployedSystem, Deployer},
        wiring::{full_setup, upgrade_strategy},
        Account, Chain, ChainConfig, Network,
    },
    config::{AccountsFile, DeployConfig, Environment},
    report::{BalanceReporter, VaultDetails},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Action {
    /// Reconnect to the contracts in the address file, deploying any that
    /// are missing. The other actions on an existing deployment only bind
    /// and fail if an address is missing.
    Connect,
    /// Deploy every contract from scratch.
    Deploy,
    /// Deploy from scratch and wire the contracts together.
    Setup,
    /// Print the vault's parameters and the y-vault's balances.
    Report,
    /// Deposit collateral into the y-vault.
    Deposit,
    /// Redeem y-vault shares.
    Withdraw,
    /// Push the y-vault's idle collateral to its strategy.
    Earn,
    /// Replace the strategy with a freshly deployed one.
    UpgradeStrategy,
}

fn parse_u256(s: &str) -> Result<U256, String> {
    U256::from_dec_str(s).map_err(|err| err.to_string())
}

#[derive(Debug, Parser)]
#[command(name = "mettalex", about = "Mettalex system setup")]
pub struct Cli {
    #[arg(short, long, value_enum, default_value_t = Action::Deploy)]
    pub action: Action,
    /// One of local, kovan or bsc-testnet.
    #[arg(short, long, default_value_t = Network::Local, value_parser = Network::from_str)]
    pub network: Network,
    /// The account alias in the account file. Unused on local chains.
    #[arg(long, default_value = "admin")]
    pub account: String,
    /// Spot price to seed the vault with during setup.
    #[arg(long, value_parser = parse_u256)]
    pub price: Option<U256>,
    /// Amount for deposits (whole coins) and withdrawals (whole shares).
    #[arg(long)]
    pub amount: Option<String>,
    /// JSON file overriding the parameters of a fresh deployment.
    #[arg(long)]
    pub deploy_config: Option<PathBuf>,
}

impl Cli {
    fn amount(&self) -> Result<&str> {
        self.amount
            .as_deref()
            .ok_or_else(|| eyre!("--amount is required for {:?}", self.action))
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let env = Environment::from_env()?;

    let accounts = if cli.network.requires_signer() {
        Some(AccountsFile::load(env.config_path()?)?)
    } else {
        None
    };
    let infura = match (&accounts, &env.rpc_url) {
        (Some(accounts), None) if cli.network == Network::Kovan => Some(accounts.infura()?.clone()),
        (Some(accounts), _) => accounts.infura.clone(),
        (None, _) => None,
    };
    let chain = Chain::connect(&ChainConfig {
        network: cli.network,
        rpc_url: env.rpc_url.clone(),
        infura,
    })
    .await?;
    let artifacts = ArtifactStore::new(env.build_dir()).load_all()?;

    match chain.resolve_account(accounts.as_ref(), &cli.account).await? {
        Account::Unlocked(address) => {
            let client = chain.unlocked_client(address);
            run_with_client(&cli, &env, chain.network(), client, address, artifacts).await
        }
        Account::Local(wallet) => {
            let address = wallet.address();
            let client = chain.signing_client(wallet);
            run_with_client(&cli, &env, chain.network(), client, address, artifacts).await
        }
    }
}

async fn run_with_client<M: Middleware + 'static>(
    cli: &Cli,
    env: &Environment,
    network: Network,
    client: Arc<M>,
    admin: Address,
    artifacts: Artifacts,
) -> Result<()> {
    let files = env.deployment_files();
    let deployer = Deployer::new(client.clone(), admin, artifacts);
    info!(%network, admin = ?admin, action = ?cli.action, "starting");

    match cli.action {
        Action::Deploy => {
            let system = deployer.deploy(&deploy_config(cli)?, &files.cache_file).await?;
            print_y_vault(&system).await
        }
        Action::Connect => match deployer.connect_deployed(network, &files).await? {
            Some(system) => print_y_vault(&system).await,
            None => Ok(()),
        },
        Action::Setup => {
            let system = deployer.deploy(&deploy_config(cli)?, &files.cache_file).await?;
            full_setup(&system, cli.price).await?;
            print_y_vault(&system).await
        }
        Action::Report => {
            let system = deployer.bind_deployed(&files.address_file).await?;
            VaultDetails::fetch(&deployer, system.vault.address())
                .await?
                .print()
                .await?;
            print_y_vault(&system).await
        }
        Action::Deposit => {
            let system = deployer.bind_deployed(&files.address_file).await?;
            let agent = Agent::new(client, admin);
            agent
                .deposit(&system.y_vault, &system.coin, cli.amount()?)
                .await?;
            BalanceReporter::new(&system).await?.print(admin, "admin").await
        }
        Action::Withdraw => {
            let system = deployer.bind_deployed(&files.address_file).await?;
            let agent = Agent::new(client, admin);
            agent.withdraw(&system.y_vault, cli.amount()?).await?;
            BalanceReporter::new(&system).await?.print(admin, "admin").await
        }
        Action::Earn => {
            let system = deployer.bind_deployed(&files.address_file).await?;
            Agent::new(client, admin).earn(&system.y_vault).await?;
            print_y_vault(&system).await
        }
        Action::UpgradeStrategy => {
            let mut system = deployer.bind_deployed(&files.address_file).await?;
            system.strategy = upgrade_strategy(&deployer, &system).await?;
            system.addresses().save(&files.cache_file)?;
            info!(cache = %files.cache_file.display(), "deployment recorded");
            Ok(())
        }
    }
}

fn deploy_config(cli: &Cli) -> Result<DeployConfig> {
    match &cli.deploy_config {
        Some(path) => DeployConfig::load(path),
        None => Ok(DeployConfig::default()),
    }
}

async fn print_y_vault<M: Middleware + 'static>(system: &DeployedSystem<M>) -> Result<()> {
    BalanceReporter::new(system)
        .await?
        .print(system.y_vault.address(), "Y Vault")
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> Result<()> {
        let cli = Cli::try_parse_from(["mettalex"])?;
        assert_eq!(cli.action, Action::Deploy);
        assert_eq!(cli.network, Network::Local);
        assert_eq!(cli.account, "admin");
        assert!(cli.price.is_none());
        assert!(cli.amount().is_err());
        Ok(())
    }

    #[test]
    fn test_flags() -> Result<()> {
        let cli = Cli::try_parse_from([
            "mettalex",
            "-a",
            "setup",
            "--network",
            "bsc-testnet",
            "--price",
            "2500000",
        ])?;
        assert_eq!(cli.action, Action::Setup);
        assert_eq!(cli.network, Network::BscTestnet);
        assert_eq!(cli.price, Some(U256::from(2_500_000u64)));

        let cli = Cli::try_parse_from(["mettalex", "-a", "upgrade-strategy"])?;
        assert_eq!(cli.action, Action::UpgradeStrategy);

        let cli = Cli::try_parse_from(["mettalex", "-a", "deposit", "--amount", "12.5"])?;
        assert_eq!(cli.amount()?, "12.5");
        Ok(())
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        let err = Cli::try_parse_from(["mettalex", "--network", "mainnet"]).unwrap_err();
        assert!(err.to_string().contains("unknown network mainnet"));
        assert!(Cli::try_parse_from(["mettalex", "--action", "destroy"]).is_err());
        assert!(Cli::try_parse_from(["mettalex", "--price", "-1"]).is_err());
    }
}
