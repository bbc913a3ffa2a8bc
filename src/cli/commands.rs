//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use ethers::providers::Middleware;
use ethers::types::Address;
use ethers::utils::{format_ether, format_units, parse_ether};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::{ChainClient, EvmChain, TokenLedger};
use crate::config::Config;
use crate::notify::Notifications;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::position::{MonitorSettings, RouterPriceSource};
use crate::stream::ChainPoller;
use crate::trading::{SwapBackend, SwapDirection, SwapExecutor, SwapSettings, UniswapV2Router};

/// Connected chain plus an executor bound to the configured router
struct Trading {
    chain: Arc<EvmChain>,
    router: Arc<dyn SwapBackend>,
    executor: Arc<SwapExecutor>,
}

async fn connect_trading(config: &Config, dry_run: bool) -> Result<Trading> {
    info!("Connecting to RPC {}...", config.rpc.endpoint);
    let chain = Arc::new(
        EvmChain::connect(&config.rpc, &config.wallet)
            .await
            .context("Failed to connect to RPC node")?,
    );

    let router: Arc<dyn SwapBackend> =
        Arc::new(UniswapV2Router::new(chain.client(), config.trading.router));
    let settings = SwapSettings::from_config(&config.trading, chain.address(), dry_run)?;
    let executor = Arc::new(SwapExecutor::new(router.clone(), settings));

    Ok(Trading {
        chain,
        router,
        executor,
    })
}

/// Start the sniper: poll for deployments until Ctrl-C
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        warn!("Running in DRY-RUN mode - no real trades will be executed");
    }

    info!("Starting deploy sniper...");
    info!(
        "Watching {:?}: buy {} ETH, target {}x, slippage {}%",
        config.watch.deployer,
        config.trading.buy_amount_eth,
        config.monitor.pnl_target,
        config.trading.slippage_tolerance * 100.0
    );

    let Trading {
        chain,
        router,
        executor,
    } = connect_trading(config, dry_run).await?;
    let wallet = chain.address();

    let buy_amount = parse_ether(config.trading.buy_amount_eth.to_string())
        .context("Invalid buy_amount_eth")?;

    match chain.native_balance().await {
        Ok(balance) => {
            info!("Wallet {:?} balance: {} ETH", wallet, format_ether(balance));
            if balance < buy_amount {
                warn!("Balance is below one buy ({} ETH) - buys will fail", config.trading.buy_amount_eth);
            }
        }
        Err(e) => warn!("Could not read wallet balance: {}", e),
    }

    let notifications = Notifications::from_config(&config.notify)?;
    let prices = Arc::new(RouterPriceSource::new(router, config.trading.wrapped_native));

    let cancel = CancellationToken::new();
    let orchestrator = Arc::new(Orchestrator::new(
        executor,
        chain.clone(),
        prices,
        notifications,
        OrchestratorSettings {
            buy_amount,
            max_open_positions: config.monitor.max_open_positions,
            monitor: MonitorSettings::from_config(&config.monitor, wallet),
        },
        cancel.child_token(),
    ));

    let poller = ChainPoller::new(chain, &config.watch);
    let poller_task = tokio::spawn(poller.run(orchestrator.clone(), cancel.clone()));

    info!("Sniper running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Received shutdown signal");
    cancel.cancel();

    if let Err(e) = poller_task.await {
        error!("Poller task ended abnormally: {}", e);
    }
    orchestrator.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

/// Manually sell the wallet's whole balance of a token
pub async fn sell(config: &Config, token: &str, force: bool, dry_run: bool) -> Result<()> {
    let token: Address = token
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid token address: {}", e))?;

    info!("Sell command: token={:?}", token);

    let Trading {
        chain, executor, ..
    } = connect_trading(config, dry_run).await?;

    let balance = chain.balance_of(token, chain.address()).await?;
    if balance.is_zero() {
        println!("Wallet holds no {:?}; nothing to sell.", token);
        return Ok(());
    }

    let decimals = chain.decimals(token).await?;
    let quote = executor.quote(SwapDirection::Sell, token, balance).await?;

    println!("\nBalance: {} tokens", format_units(balance, decimals as u32)?);
    println!("Quoted:  {} ETH", format_ether(quote.amount_out));

    // Confirmation prompt (unless --force)
    if !force && !dry_run {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Sell entire balance of {:?}? This cannot be undone.",
                token
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Sell cancelled by user");
            return Ok(());
        }
    }

    let receipt = executor
        .swap(SwapDirection::Sell, token, balance)
        .await
        .context("Sell transaction failed")?;

    if dry_run {
        println!("\nDRY-RUN: sell not submitted.");
        return Ok(());
    }

    info!("Sell successful: {:?}", receipt.transaction_hash);
    println!("\nSell transaction confirmed!");
    println!("Tx: {:?}", receipt.transaction_hash);
    println!(
        "View on explorer: {}/tx/{:?}",
        config.notify.explorer_url.trim_end_matches('/'),
        receipt.transaction_hash
    );

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check system health
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("RPC Endpoint... ");
    let chain = match EvmChain::connect(&config.rpc, &config.wallet).await {
        Ok(chain) => chain,
        Err(e) => {
            println!("FAILED: {}", e);
            println!("\nCannot continue without RPC.");
            return Ok(());
        }
    };
    match check_rpc(&chain).await {
        Ok((height, latency)) => println!("OK (block {}, {}ms)", height, latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Wallet... ");
    match chain.native_balance().await {
        Ok(balance) => println!("OK ({:?}, {} ETH)", chain.address(), format_ether(balance)),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Router contract... ");
    match check_contract(&chain, config.trading.router).await {
        Ok(()) => println!("OK ({:?})", config.trading.router),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Wrapped native token... ");
    match chain.decimals(config.trading.wrapped_native).await {
        Ok(decimals) => println!("OK ({} decimals)", decimals),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Notifications... ");
    if config.notify.is_configured() {
        println!("TELEGRAM (chat {})", config.notify.chat_id);
    } else {
        println!("LOG ONLY (bot token or chat id not set)");
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_rpc(chain: &EvmChain) -> Result<(u64, u64)> {
    let start = Instant::now();
    let height = chain.block_number().await?;
    let latency = start.elapsed().as_millis() as u64;

    Ok((height, latency))
}

async fn check_contract(chain: &EvmChain, address: Address) -> Result<()> {
    let code = chain.client().get_code(address, None).await?;
    if code.as_ref().is_empty() {
        anyhow::bail!("no contract code at {:?}", address);
    }
    Ok(())
}
