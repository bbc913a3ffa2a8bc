//! Deploy Sniper - buys a watched deployer's new tokens, sells at a PnL target
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Freshly deployed tokens are frequently honeypots or rug pulls.
//! - The take-profit check is interval-based and can miss short spikes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use deploy_sniper::cli::commands;
use deploy_sniper::config::Config;

/// Deploy Sniper - deployment-triggered token trading
#[derive(Parser)]
#[command(name = "deploy-sniper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start watching for deployments
    Start {
        /// Quote and log swaps without sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Manually sell the whole balance of a token
    Sell {
        /// Token contract address
        token: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// Quote only, don't execute
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check system health (RPC, wallet, router, notifications)
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "deploy_sniper=info"
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid log directive: {}", e))?,
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = startup_checks(&config, &cli.command) {
        error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(&config, dry_run).await,
        Commands::Sell {
            token,
            force,
            dry_run,
        } => commands::sell(&config, &token, force, dry_run).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Refuse to trade without a signing key
fn startup_checks(config: &Config, command: &Commands) -> Result<()> {
    if matches!(command, Commands::Config) {
        return Ok(());
    }

    info!("Performing startup checks...");

    if config.wallet.private_key.trim().is_empty() {
        anyhow::bail!("PRIVATE_KEY environment variable not set (or wallet.private_key)");
    }

    if config.rpc.endpoint.starts_with("http://") && !config.rpc.endpoint.contains("localhost") {
        warn!("RPC endpoint is not TLS - transactions and queries are sent in clear text");
    }

    warn!(
        "Safety limits active: buy={} ETH, max_open_positions={}",
        config.trading.buy_amount_eth, config.monitor.max_open_positions
    );

    info!("Startup checks passed");
    Ok(())
}
