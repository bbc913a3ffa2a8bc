//! Orchestrator - from deployment to monitored position
//!
//! Each detected deployment is bought inline (the poller waits for it), and
//! every successful buy gets its own monitor task. Monitor tasks are tracked
//! so shutdown can cancel them and wait for them to stop.

use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::chain::TokenLedger;
use crate::notify::Notifications;
use crate::position::{MonitorSettings, Position, PositionMonitor, PriceSource};
use crate::stream::{Deployment, DeploymentHandler};
use crate::trading::{SwapDirection, SwapExecutor};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Native currency committed per buy (wei)
    pub buy_amount: U256,
    /// Positions allowed open at once
    pub max_open_positions: usize,
    pub monitor: MonitorSettings,
}

pub struct Orchestrator {
    executor: Arc<SwapExecutor>,
    ledger: Arc<dyn TokenLedger>,
    prices: Arc<dyn PriceSource>,
    notifications: Notifications,
    settings: OrchestratorSettings,
    admission: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<SwapExecutor>,
        ledger: Arc<dyn TokenLedger>,
        prices: Arc<dyn PriceSource>,
        notifications: Notifications,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            ledger,
            prices,
            notifications,
            admission: Arc::new(Semaphore::new(settings.max_open_positions)),
            settings,
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Positions whose monitor is still running
    pub fn open_positions(&self) -> usize {
        self.settings.max_open_positions - self.admission.available_permits()
    }

    /// Buy the deployed token and start monitoring it.
    ///
    /// Returns the new position as it was at creation, or `None` when the
    /// deployment was dropped (cap reached, buy failed, shutting down).
    pub async fn open_position(&self, deployment: Deployment) -> Option<Position> {
        let token = deployment.token;

        if self.cancel.is_cancelled() {
            debug!("Shutting down, ignoring deployment {:?}", token);
            return None;
        }

        let permit = match self.admission.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Position cap ({}) reached, skipping {:?}",
                    self.settings.max_open_positions, token
                );
                return None;
            }
        };

        info!(
            "Buying {:?} (deployed in block {}) for {} wei",
            token, deployment.block_number, self.settings.buy_amount
        );

        let receipt = match self
            .executor
            .swap(SwapDirection::Buy, token, self.settings.buy_amount)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Buy of {:?} failed, dropping candidate: {}", token, e);
                return None;
            }
        };

        let position = Position::new(token, self.settings.buy_amount, receipt.transaction_hash);
        info!(
            "[{}] Position opened: {:?} (tx {:?})",
            position.id, token, position.buy_tx
        );
        self.notifications.buy_executed(&position);

        let monitor = match PositionMonitor::new(
            position.clone(),
            self.settings.monitor.clone(),
            self.ledger.clone(),
            self.prices.clone(),
            self.executor.clone(),
            self.notifications.clone(),
        ) {
            Ok(monitor) => monitor,
            Err(e) => {
                error!("[{}] Cannot start monitor: {}", position.id, e);
                return None;
            }
        };

        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let _permit = permit;
            let closed = monitor.run(cancel).await;
            debug!("[{}] Monitor task finished ({:?})", closed.id, closed.state());
        });

        Some(position)
    }

    /// Cancel every monitor and wait for them to stop
    pub async fn shutdown(&self) {
        info!("Stopping {} position monitor(s)", self.open_positions());
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("All position monitors stopped");
    }
}

#[async_trait]
impl DeploymentHandler for Orchestrator {
    async fn on_deployment(&self, deployment: Deployment) {
        self.open_position(deployment).await;
    }
}
