//! Swap executor
//!
//! One call is one swap: build the path through the wrapped native token,
//! quote it, bound the output by the slippage tolerance, submit with a short
//! deadline and wait (bounded) for inclusion. Nothing is retried here;
//! retry policy belongs to the caller.

use ethers::types::{Address, TransactionReceipt, TxHash, U256, U64};
use ethers::utils::parse_units;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{GasParams, SwapBackend, SwapDirection, SwapOrder, SwapQuote};
use crate::config::TradingConfig;
use crate::error::{Error, Result};

/// Fixed-point scale for the slippage factor (parts per billion)
const SLIPPAGE_SCALE: u64 = 1_000_000_000;

/// Immutable swap parameters derived from configuration
#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub wrapped_native: Address,
    /// Receives swap output (the trading wallet)
    pub recipient: Address,
    pub slippage_tolerance: f64,
    pub deadline: Duration,
    pub gas: GasParams,
    pub confirmation_timeout: Duration,
    pub approve_before_sell: bool,
    /// Quote and log only; nothing is broadcast
    pub dry_run: bool,
}

impl SwapSettings {
    pub fn from_config(trading: &TradingConfig, recipient: Address, dry_run: bool) -> Result<Self> {
        let gas_price: U256 = parse_units(trading.gas_price_gwei.to_string(), "gwei")
            .map_err(|e| Error::Config(format!("Invalid gas_price_gwei: {}", e)))?
            .into();

        Ok(Self {
            wrapped_native: trading.wrapped_native,
            recipient,
            slippage_tolerance: trading.slippage_tolerance,
            deadline: Duration::from_secs(trading.deadline_secs),
            gas: GasParams {
                limit: U256::from(trading.gas_limit),
                price: gas_price,
            },
            confirmation_timeout: Duration::from_secs(trading.confirmation_timeout_secs),
            approve_before_sell: trading.approve_before_sell,
            dry_run,
        })
    }
}

/// Router path for a direction: native side is always the wrapped token
pub fn build_path(direction: SwapDirection, wrapped_native: Address, token: Address) -> Vec<Address> {
    match direction {
        SwapDirection::Buy => vec![wrapped_native, token],
        SwapDirection::Sell => vec![token, wrapped_native],
    }
}

/// `floor(quoted * (1 - slippage))`
pub fn min_amount_out(quoted: U256, slippage: f64) -> U256 {
    let keep = ((1.0 - slippage.clamp(0.0, 1.0)) * SLIPPAGE_SCALE as f64).round() as u64;
    let scale = U256::from(SLIPPAGE_SCALE);

    match quoted.checked_mul(U256::from(keep)) {
        Some(scaled) => scaled / scale,
        // Only reachable for quotes near 2^226; lose the sub-unit precision
        None => quoted / scale * U256::from(keep),
    }
}

/// A swap the node accepted, not yet known to be mined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedSwap {
    pub direction: SwapDirection,
    pub token: Address,
    pub tx_hash: TxHash,
    /// Unix seconds after which the router rejects it
    pub deadline: u64,
    /// Dry run; nothing was broadcast
    pub simulated: bool,
}

impl SubmittedSwap {
    /// Past its deadline the transaction can no longer swap, only revert
    pub fn expired(&self, now: u64) -> bool {
        now > self.deadline
    }
}

/// Executes buys and sells through a [`SwapBackend`]
pub struct SwapExecutor {
    backend: Arc<dyn SwapBackend>,
    settings: SwapSettings,
}

impl SwapExecutor {
    pub fn new(backend: Arc<dyn SwapBackend>, settings: SwapSettings) -> Self {
        if settings.dry_run {
            info!("Swap executor in DRY RUN mode - swaps will be quoted, not sent");
        }
        Self { backend, settings }
    }

    pub fn settings(&self) -> &SwapSettings {
        &self.settings
    }

    /// Quote `amount` along the direction's path
    pub async fn quote(
        &self,
        direction: SwapDirection,
        token: Address,
        amount: U256,
    ) -> Result<SwapQuote> {
        let path = build_path(direction, self.settings.wrapped_native, token);
        let amounts = self.backend.amounts_out(amount, path.clone()).await?;

        let amount_out = amounts
            .last()
            .copied()
            .filter(|_| amounts.len() == path.len())
            .ok_or_else(|| {
                Error::SwapQuote(format!(
                    "router returned {} amounts for a {}-hop path",
                    amounts.len(),
                    path.len()
                ))
            })?;

        Ok(SwapQuote {
            amount_in: amount,
            path,
            amount_out,
        })
    }

    /// Swap `amount` of the input side and wait for the receipt
    pub async fn swap(
        &self,
        direction: SwapDirection,
        token: Address,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        let submitted = self.submit(direction, token, amount).await?;
        self.confirm(&submitted).await
    }

    /// Quote, approve when selling, and broadcast. Returns as soon as the
    /// node accepted the transaction.
    pub async fn submit(
        &self,
        direction: SwapDirection,
        token: Address,
        amount: U256,
    ) -> Result<SubmittedSwap> {
        if amount.is_zero() {
            return Err(Error::SwapSubmission(format!("nothing to {}", direction)));
        }

        let quote = self.quote(direction, token, amount).await?;
        let quoted_out = quote.amount_out;
        let order = self.build_order(direction, quote);
        let deadline = order.deadline.low_u64();

        info!(
            "Swap {} {:?}: in={} quoted_out={} min_out={}",
            direction, token, order.amount_in, quoted_out, order.min_amount_out
        );

        if self.settings.dry_run {
            info!("DRY-RUN: would submit {} of {:?}", direction, token);
            return Ok(SubmittedSwap {
                direction,
                token,
                tx_hash: TxHash::zero(),
                deadline,
                simulated: true,
            });
        }

        if direction == SwapDirection::Sell && self.settings.approve_before_sell {
            self.bounded(self.backend.ensure_allowance(token, order.amount_in, order.gas))
                .await?;
        }

        let tx_hash = self.backend.submit(&order).await.map_err(|e| match e {
            Error::SwapSubmission(_) => e,
            other => Error::SwapSubmission(other.to_string()),
        })?;

        info!("Swap {} submitted: {:?}", direction, tx_hash);

        Ok(SubmittedSwap {
            direction,
            token,
            tx_hash,
            deadline,
            simulated: false,
        })
    }

    /// Wait (bounded) for a submitted swap to be mined successfully.
    ///
    /// On a timeout the transaction is still out there; the caller keeps
    /// `submitted` and can look it up later with [`SwapExecutor::receipt`].
    pub async fn confirm(&self, submitted: &SubmittedSwap) -> Result<TransactionReceipt> {
        if submitted.simulated {
            return Ok(TransactionReceipt {
                status: Some(U64::one()),
                ..Default::default()
            });
        }

        let direction = submitted.direction;
        let tx_hash = submitted.tx_hash;

        let receipt = self
            .bounded(self.backend.confirm(tx_hash))
            .await
            .map_err(|e| match e {
                Error::SwapConfirmation(_) => e,
                other => Error::SwapConfirmation(other.to_string()),
            })?
            .ok_or_else(|| {
                Error::SwapConfirmation(format!("transaction {:?} dropped", tx_hash))
            })?;

        if receipt.status == Some(U64::zero()) {
            error!("Swap {} reverted: {:?}", direction, tx_hash);
            return Err(Error::SwapConfirmation(format!(
                "transaction {:?} reverted",
                tx_hash
            )));
        }

        info!(
            "Swap {} confirmed in block {:?}: {:?}",
            direction, receipt.block_number, tx_hash
        );

        Ok(receipt)
    }

    /// Receipt of an earlier submission, `None` while it is not mined
    pub async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.backend.receipt(tx_hash).await
    }

    fn build_order(&self, direction: SwapDirection, quote: SwapQuote) -> SwapOrder {
        let deadline = chrono::Utc::now().timestamp().max(0) as u64 + self.settings.deadline.as_secs();

        SwapOrder {
            direction,
            amount_in: quote.amount_in,
            min_amount_out: min_amount_out(quote.amount_out, self.settings.slippage_tolerance),
            path: quote.path,
            recipient: self.settings.recipient,
            deadline: U256::from(deadline),
            gas: self.settings.gas,
        }
    }

    /// Await an on-chain wait under the confirmation timeout
    async fn bounded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.settings.confirmation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Gave up waiting after {}s",
                    self.settings.confirmation_timeout.as_secs()
                );
                Err(Error::SwapConfirmation(format!(
                    "timed out after {}s",
                    self.settings.confirmation_timeout.as_secs()
                )))
            }
        }
    }
}
