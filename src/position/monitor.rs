//! Position monitor
//!
//! One monitor per open position, each on its own task. A tick reads the
//! wallet's token balance and the token price, computes the PnL multiple
//! against the committed amount and sells the whole balance once the target
//! is met. Query errors and failed sells never end the loop; only a
//! confirmed sale (or the optional failure cap) does.
//!
//! At most one sell is in flight. A sell whose confirmation wait ran out is
//! kept as pending and looked up on later ticks instead of being re-sent.

use ethers::types::{Address, TxHash, U256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auto_sell::{check_trigger, pnl_multiple};
use super::price_feed::PriceSource;
use super::{Position, PositionState};
use crate::chain::TokenLedger;
use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::notify::Notifications;
use crate::trading::{SubmittedSwap, SwapDirection, SwapExecutor};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub pnl_target: f64,
    pub interval: Duration,
    /// Consecutive failed sells before giving up; `None` retries forever
    pub max_sell_failures: Option<u32>,
    /// Wallet holding the bought tokens
    pub wallet: Address,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig, wallet: Address) -> Self {
        Self {
            pnl_target: config.pnl_target,
            interval: config.interval(),
            max_sell_failures: config.max_sell_failures,
            wallet,
        }
    }
}

/// Result of a single monitoring tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Balance or price unavailable; try again next interval
    Skipped,
    /// Below target
    Holding { pnl: f64 },
    /// Target met but the sell failed; still monitoring
    SellFailed { pnl: f64, failures: u32 },
    /// An earlier sell is still unmined; nothing new was sent
    SellPending { tx_hash: TxHash },
    /// Sell confirmed (terminal)
    Sold { pnl: f64 },
    /// Failure cap reached (terminal)
    Abandoned { failures: u32 },
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickOutcome::Sold { .. } | TickOutcome::Abandoned { .. })
    }
}

/// Sell sent but not confirmed, with the multiple that triggered it
#[derive(Debug, Clone)]
struct PendingSell {
    swap: SubmittedSwap,
    pnl: f64,
}

enum PendingResolution {
    /// Mined, or the balance is gone: the sale happened in this tx
    Landed(TxHash),
    InFlight,
    /// Reverted or expired; a new sell may be sent
    Cleared,
}

/// Owns one [`Position`] until it is sold or abandoned
pub struct PositionMonitor {
    position: Position,
    settings: MonitorSettings,
    ledger: Arc<dyn TokenLedger>,
    prices: Arc<dyn PriceSource>,
    executor: Arc<SwapExecutor>,
    notifications: Notifications,
    decimals: Option<u8>,
    sell_failures: u32,
    pending_sell: Option<PendingSell>,
}

impl PositionMonitor {
    /// Take ownership of a freshly bought position and move it to `Monitoring`
    pub fn new(
        mut position: Position,
        settings: MonitorSettings,
        ledger: Arc<dyn TokenLedger>,
        prices: Arc<dyn PriceSource>,
        executor: Arc<SwapExecutor>,
        notifications: Notifications,
    ) -> Result<Self> {
        position.transition(PositionState::Monitoring)?;

        Ok(Self {
            position,
            settings,
            ledger,
            prices,
            executor,
            notifications,
            decimals: None,
            sell_failures: 0,
            pending_sell: None,
        })
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Token balance and PnL multiple right now
    async fn observe(&mut self) -> Result<(U256, f64)> {
        let token = self.position.token;

        let decimals = match self.decimals {
            Some(decimals) => decimals,
            None => {
                let decimals = self.ledger.decimals(token).await?;
                self.decimals = Some(decimals);
                decimals
            }
        };

        let balance = self.ledger.balance_of(token, self.settings.wallet).await?;
        if balance.is_zero() {
            return Ok((balance, 0.0));
        }

        let price = self.prices.price_in_native(token, decimals).await?;
        let pnl = pnl_multiple(balance, decimals, price, self.position.buy_amount_native())?;

        Ok((balance, pnl))
    }

    /// One pass of the monitoring loop
    pub async fn tick(&mut self) -> TickOutcome {
        let token = self.position.token;

        let (balance, pnl) = match self.observe().await {
            Ok(observed) => observed,
            Err(e) => {
                warn!("[{}] Query failed for {:?}, retrying next tick: {}", self.position.id, token, e);
                return TickOutcome::Skipped;
            }
        };
        self.position.last_pnl = Some(pnl);

        if let Some(pending) = self.pending_sell.take() {
            match self.resolve_pending(&pending, balance).await {
                PendingResolution::Landed(tx_hash) => return self.complete_sale(tx_hash, pending.pnl),
                PendingResolution::InFlight => {
                    let tx_hash = pending.swap.tx_hash;
                    self.pending_sell = Some(pending);
                    return TickOutcome::SellPending { tx_hash };
                }
                PendingResolution::Cleared => {}
            }
        }

        let Some(signal) = check_trigger(pnl, self.settings.pnl_target, balance) else {
            debug!(
                "[{}] {:?} at {:.4}x (target {:.2}x)",
                self.position.id, token, pnl, self.settings.pnl_target
            );
            self.sell_failures = 0;
            return TickOutcome::Holding { pnl };
        };

        info!(
            "[{}] TAKE PROFIT: {:?} at {:.4}x >= {:.2}x, selling {}",
            self.position.id, token, signal.pnl, signal.target, signal.sell_amount
        );

        let submitted = match self
            .executor
            .submit(SwapDirection::Sell, token, signal.sell_amount)
            .await
        {
            Ok(submitted) => submitted,
            Err(e) => return self.sell_failed(pnl, e),
        };

        let e = match self.executor.confirm(&submitted).await {
            Ok(receipt) => return self.complete_sale(receipt.transaction_hash, pnl),
            Err(e) => e,
        };

        match self.executor.receipt(submitted.tx_hash).await {
            Ok(Some(receipt)) if receipt.status != Some(U64::zero()) => {
                self.complete_sale(receipt.transaction_hash, pnl)
            }
            Ok(Some(_)) => self.sell_failed(pnl, e),
            _ => {
                // Not mined yet; looked up before anything is re-sent
                self.pending_sell = Some(PendingSell { swap: submitted, pnl });
                self.sell_failed(pnl, e)
            }
        }
    }

    /// Decide what became of an unconfirmed sell
    async fn resolve_pending(&self, pending: &PendingSell, balance: U256) -> PendingResolution {
        let tx_hash = pending.swap.tx_hash;

        match self.executor.receipt(tx_hash).await {
            Ok(Some(receipt)) if receipt.status == Some(U64::zero()) => {
                warn!("[{}] Pending sell {:?} reverted", self.position.id, tx_hash);
                PendingResolution::Cleared
            }
            Ok(Some(receipt)) => {
                info!(
                    "[{}] Pending sell {:?} mined in block {:?}",
                    self.position.id, tx_hash, receipt.block_number
                );
                PendingResolution::Landed(receipt.transaction_hash)
            }
            Ok(None) if balance.is_zero() => {
                info!(
                    "[{}] Balance drained while sell {:?} was pending, treating it as sold",
                    self.position.id, tx_hash
                );
                PendingResolution::Landed(tx_hash)
            }
            Ok(None) if pending.swap.expired(chrono::Utc::now().timestamp().max(0) as u64) => {
                warn!(
                    "[{}] Pending sell {:?} not mined before its deadline, selling again",
                    self.position.id, tx_hash
                );
                PendingResolution::Cleared
            }
            Ok(None) => PendingResolution::InFlight,
            Err(e) => {
                warn!("[{}] Receipt lookup for {:?} failed: {}", self.position.id, tx_hash, e);
                PendingResolution::InFlight
            }
        }
    }

    fn complete_sale(&mut self, tx_hash: TxHash, pnl: f64) -> TickOutcome {
        self.position.last_pnl = Some(pnl);
        if let Err(e) = self.position.mark_sold(tx_hash) {
            error!("[{}] {}", self.position.id, e);
        }
        info!(
            "[{}] Sold {:?} at {:.4}x: {:?}",
            self.position.id, self.position.token, pnl, tx_hash
        );
        self.notifications.sell_executed(&self.position, pnl);
        TickOutcome::Sold { pnl }
    }

    /// Only swap-path failures count toward the cap; an RPC outage mid-sell
    /// is retried without using up attempts.
    fn sell_failed(&mut self, pnl: f64, e: Error) -> TickOutcome {
        let token = self.position.token;

        if !e.is_swap_failure() {
            warn!(
                "[{}] Sell of {:?} interrupted, not counted as a failure: {}",
                self.position.id, token, e
            );
            return TickOutcome::SellFailed {
                pnl,
                failures: self.sell_failures,
            };
        }

        self.sell_failures += 1;
        error!(
            "[{}] Sell of {:?} failed (attempt {}): {}",
            self.position.id, token, self.sell_failures, e
        );

        match self.settings.max_sell_failures {
            // Never abandon while a sell might still land
            Some(max) if self.sell_failures >= max && self.pending_sell.is_none() => {
                if let Err(te) = self.position.transition(PositionState::Failed) {
                    error!("[{}] {}", self.position.id, te);
                }
                warn!(
                    "[{}] Abandoning {:?} after {} failed sells",
                    self.position.id, token, self.sell_failures
                );
                self.notifications
                    .position_failed(&self.position, self.sell_failures, &e);
                TickOutcome::Abandoned {
                    failures: self.sell_failures,
                }
            }
            _ => TickOutcome::SellFailed {
                pnl,
                failures: self.sell_failures,
            },
        }
    }

    /// Tick, sleep, repeat until terminal or cancelled. Returns the position
    /// in its final state (still `Monitoring` when cancelled).
    pub async fn run(mut self, cancel: CancellationToken) -> Position {
        info!(
            "[{}] Monitoring {:?} every {}ms, target {:.2}x",
            self.position.id,
            self.position.token,
            self.settings.interval.as_millis(),
            self.settings.pnl_target
        );

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            if outcome.is_terminal() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        info!(
            "[{}] Monitor for {:?} stopped in state {:?}",
            self.position.id,
            self.position.token,
            self.position.state()
        );
        self.position
    }
}
