//! Configuration loading and validation

use anyhow::{Context, Result};
use ethers::types::{Address, H160};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Uniswap V2 style router on Base
pub const BASE_ROUTER_ADDRESS: Address = H160([
    0x47, 0x52, 0xba, 0x5d, 0xbc, 0x23, 0xf4, 0x4d, 0x87, 0x82, 0x62, 0x76, 0xbf, 0x6f, 0xd6, 0xb1,
    0xc3, 0x72, 0xad, 0x24,
]);

/// WETH predeploy on Base (and other OP-stack chains)
pub const BASE_WETH_ADDRESS: Address = H160([
    0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x06,
]);

/// Plain environment names honoured as defaults, mapped to config keys.
/// `SNIPER__`-prefixed variables and the config file take precedence.
const ENV_DEFAULTS: &[(&str, &str)] = &[
    ("rpc.endpoint", "RPC_URL"),
    ("wallet.private_key", "PRIVATE_KEY"),
    ("wallet.address", "WALLET_ADDRESS"),
    ("watch.deployer", "TARGET_ADDRESS"),
    ("notify.bot_token", "TELEGRAM_BOT_TOKEN"),
    ("notify.chat_id", "CHANNEL_CHAT_ID"),
    ("trading.buy_amount_eth", "BUY_AMOUNT"),
    ("trading.slippage_tolerance", "SLIPPAGE_TOLERANCE"),
    ("monitor.pnl_target", "PNL_TARGET"),
];

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How often a pending transaction is polled for its receipt
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    /// Attempts for the startup connectivity probe
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// Hex-encoded signing key. Never printed.
    #[serde(default)]
    pub private_key: String,
    /// Expected wallet address; checked against the key when set
    #[serde(default)]
    pub address: Option<Address>,
}

/// Which deployer to watch and how often
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub deployer: Address,
    #[serde(default = "default_block_poll_interval_ms")]
    pub block_poll_interval_ms: u64,
    /// Upper bound on heights scanned in a single tick
    #[serde(default = "default_max_blocks_per_tick")]
    pub max_blocks_per_tick: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_router")]
    pub router: Address,
    #[serde(default = "default_wrapped_native")]
    pub wrapped_native: Address,
    /// Native currency committed per buy (ETH units)
    #[serde(default = "default_buy_amount_eth")]
    pub buy_amount_eth: f64,
    /// Fraction in [0, 1), e.g. 0.06 for 6%
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: f64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: f64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub approve_before_sell: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Sell once current value / committed amount reaches this multiple
    #[serde(default = "default_pnl_target")]
    pub pnl_target: f64,
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
    /// Open positions allowed at once; detections beyond this are dropped
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Consecutive failed sells before a position is abandoned (unset = never)
    #[serde(default)]
    pub max_sell_failures: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,
}

impl NotifyConfig {
    /// Telegram delivery is possible only with both credentials present
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            chain_id: default_chain_id(),
            timeout_ms: default_timeout_ms(),
            receipt_poll_ms: default_receipt_poll_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            router: default_router(),
            wrapped_native: default_wrapped_native(),
            buy_amount_eth: default_buy_amount_eth(),
            slippage_tolerance: default_slippage_tolerance(),
            deadline_secs: default_deadline_secs(),
            gas_limit: default_gas_limit(),
            gas_price_gwei: default_gas_price_gwei(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            approve_before_sell: true,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pnl_target: default_pnl_target(),
            interval_ms: default_monitor_interval_ms(),
            max_open_positions: default_max_open_positions(),
            max_sell_failures: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api_base(),
            parse_mode: default_parse_mode(),
            timeout_ms: default_notify_timeout_ms(),
            explorer_url: default_explorer_url(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    "https://mainnet.base.org".into()
}

fn default_chain_id() -> u64 {
    8453
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_receipt_poll_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_block_poll_interval_ms() -> u64 {
    10000
}

fn default_max_blocks_per_tick() -> u64 {
    50
}

fn default_router() -> Address {
    BASE_ROUTER_ADDRESS
}

fn default_wrapped_native() -> Address {
    BASE_WETH_ADDRESS
}

fn default_buy_amount_eth() -> f64 {
    0.005
}

fn default_slippage_tolerance() -> f64 {
    0.06
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_gas_limit() -> u64 {
    200000
}

fn default_gas_price_gwei() -> f64 {
    5.0
}

fn default_confirmation_timeout_secs() -> u64 {
    180
}

fn default_pnl_target() -> f64 {
    2.0
}

fn default_monitor_interval_ms() -> u64 {
    30000
}

fn default_max_open_positions() -> usize {
    25
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_parse_mode() -> String {
    "Markdown".into()
}

fn default_notify_timeout_ms() -> u64 {
    5000
}

fn default_explorer_url() -> String {
    "https://basescan.org".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut builder = config::Config::builder();

        // Plain env names (RPC_URL, TARGET_ADDRESS, ...) act as defaults
        for (key, var) in ENV_DEFAULTS {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    builder = builder.set_default(*key, value.trim().to_string())?;
                }
            }
        }

        let settings = builder
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration (is TARGET_ADDRESS set?)")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.watch.deployer.is_zero() {
            anyhow::bail!("watch.deployer must be a non-zero address");
        }

        if self.watch.block_poll_interval_ms == 0 || self.monitor.interval_ms == 0 {
            anyhow::bail!("poll intervals must be positive");
        }

        if self.watch.max_blocks_per_tick == 0 {
            anyhow::bail!("max_blocks_per_tick must be positive");
        }

        // Validate trading amounts
        if !(self.trading.buy_amount_eth > 0.0) {
            anyhow::bail!("buy_amount_eth must be positive");
        }

        if !(0.0..1.0).contains(&self.trading.slippage_tolerance) {
            anyhow::bail!(
                "slippage_tolerance must be in [0, 1), got {}",
                self.trading.slippage_tolerance
            );
        }

        if !(self.monitor.pnl_target > 0.0) {
            anyhow::bail!("pnl_target must be positive");
        }

        if self.trading.gas_limit == 0 {
            anyhow::bail!("gas_limit must be positive");
        }

        if !(self.trading.gas_price_gwei > 0.0) {
            anyhow::bail!("gas_price_gwei must be positive");
        }

        if self.trading.deadline_secs == 0 || self.trading.confirmation_timeout_secs == 0 {
            anyhow::bail!("deadline_secs and confirmation_timeout_secs must be positive");
        }

        if self.trading.router.is_zero() || self.trading.wrapped_native.is_zero() {
            anyhow::bail!("router and wrapped_native must be non-zero addresses");
        }

        if self.monitor.max_open_positions == 0 {
            anyhow::bail!("max_open_positions must be at least 1");
        }

        if self.monitor.pnl_target <= 1.0 {
            tracing::warn!(
                "pnl_target {} is at or below break-even - positions will sell at a loss",
                self.monitor.pnl_target
            );
        }

        if self.notify.enabled && !self.notify.is_configured() {
            tracing::warn!("Notifications enabled but bot token or chat id missing - logging only");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    chain_id: {}
    timeout: {}ms
  Wallet:
    private_key: {}
    address: {}
  Watch:
    deployer: {:?}
    block_poll_interval: {}ms
    max_blocks_per_tick: {}
  Trading:
    router: {:?}
    wrapped_native: {:?}
    buy_amount: {} ETH
    slippage: {}%
    deadline: {}s
    gas: {} @ {} gwei
    confirmation_timeout: {}s
  Monitor:
    pnl_target: {}x
    interval: {}ms
    max_open_positions: {}
    max_sell_failures: {}
  Notify:
    enabled: {}
    bot_token: {}
    chat_id: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.chain_id,
            self.rpc.timeout_ms,
            mask_secret(&self.wallet.private_key),
            self.wallet
                .address
                .map(|a| format!("{:?}", a))
                .unwrap_or_else(|| "(derived from key)".to_string()),
            self.watch.deployer,
            self.watch.block_poll_interval_ms,
            self.watch.max_blocks_per_tick,
            self.trading.router,
            self.trading.wrapped_native,
            self.trading.buy_amount_eth,
            self.trading.slippage_tolerance * 100.0,
            self.trading.deadline_secs,
            self.trading.gas_limit,
            self.trading.gas_price_gwei,
            self.trading.confirmation_timeout_secs,
            self.monitor.pnl_target,
            self.monitor.interval_ms,
            self.monitor.max_open_positions,
            self.monitor
                .max_sell_failures
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.notify.enabled,
            mask_secret(&self.notify.bot_token),
            if self.notify.chat_id.is_empty() {
                "(not set)"
            } else {
                &self.notify.chat_id
            },
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            wallet: WalletConfig::default(),
            watch: WatchConfig {
                deployer: Address::zero(),
                block_poll_interval_ms: default_block_poll_interval_ms(),
                max_blocks_per_tick: default_max_blocks_per_tick(),
            },
            trading: TradingConfig::default(),
            monitor: MonitorConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}
