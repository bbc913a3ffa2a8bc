//! Notifier - best-effort status messages
//!
//! Delivery is one attempt on a detached task. Failures are logged and
//! dropped; nothing here can slow down or fail a trade.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::error::{Error, Result};
use crate::position::Position;

/// A message sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// One delivery attempt
    async fn send(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    client: Client,
    url: String,
    chat_id: String,
    parse_mode: String,
}

impl TelegramNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Notification(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.chat_id.clone(),
            parse_mode: config.parse_mode.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: &self.parse_mode,
        };

        // The response body is not inspected; only transport errors count
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("HTTP request failed: {}", e.without_url())))?;

        Ok(())
    }
}

/// Writes messages to the log when no channel is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!("[notify] {}", text);
        Ok(())
    }
}

/// Fire-and-forget front for a [`Notifier`], plus the message formats
#[derive(Clone)]
pub struct Notifications {
    sink: Arc<dyn Notifier>,
    explorer_url: String,
}

impl Notifications {
    pub fn new(sink: Arc<dyn Notifier>, explorer_url: impl Into<String>) -> Self {
        Self {
            sink,
            explorer_url: explorer_url.into(),
        }
    }

    /// Telegram when credentials are present, log-only otherwise
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let sink: Arc<dyn Notifier> = if config.is_configured() {
            info!("Notifications: Telegram chat {}", config.chat_id);
            Arc::new(TelegramNotifier::new(config)?)
        } else {
            info!("Notifications: log only (Telegram not configured)");
            Arc::new(LogNotifier)
        };

        Ok(Self::new(sink, config.explorer_url.clone()))
    }

    /// Queue a message and return immediately
    pub fn notify(&self, text: String) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            match sink.send(&text).await {
                Ok(()) => debug!("Notification delivered"),
                Err(e) => warn!("Notification dropped: {}", e),
            }
        });
    }

    pub fn buy_executed(&self, position: &Position) {
        self.notify(format!(
            "*Bought* `{:?}`\nAmount: {} ETH\nTx: {}",
            position.token,
            position.buy_amount_native(),
            self.tx_url(position.buy_tx)
        ));
    }

    pub fn sell_executed(&self, position: &Position, pnl: f64) {
        let tx = position
            .sell_tx
            .map(|hash| self.tx_url(hash))
            .unwrap_or_else(|| "n/a".to_string());

        self.notify(format!(
            "*Sold* `{:?}` at {:.2}x\nHeld: {}s\nTx: {}",
            position.token,
            pnl,
            position.held_for().num_seconds(),
            tx
        ));
    }

    pub fn position_failed(&self, position: &Position, failures: u32, last_error: &Error) {
        self.notify(format!(
            "*Sell abandoned* `{:?}` after {} failed attempts\nLast error: {}",
            position.token, failures, last_error
        ));
    }

    fn tx_url(&self, hash: ethers::types::H256) -> String {
        format!("{}/tx/{:?}", self.explorer_url.trim_end_matches('/'), hash)
    }
}
