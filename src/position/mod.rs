//! Position management module
//!
//! A position exists from a confirmed buy until it is sold (or abandoned).
//! It is owned by exactly one monitor task and never persisted.

pub mod auto_sell;
pub mod monitor;
pub mod price_feed;

use ethers::types::{Address, H256, U256};
use uuid::Uuid;

use crate::error::{Error, Result};

pub use auto_sell::{pnl_multiple, ExitSignal};
pub use monitor::{MonitorSettings, PositionMonitor};
pub use price_feed::{PriceSource, RouterPriceSource};

/// Lifecycle of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    /// Buy confirmed, monitor not yet running
    Bought,
    /// Monitor polling PnL
    Monitoring,
    /// Sell confirmed (terminal)
    Sold,
    /// Abandoned after repeated sell failures (terminal)
    Failed,
}

impl PositionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Sold | PositionState::Failed)
    }

    fn can_transition_to(&self, next: PositionState) -> bool {
        matches!(
            (self, next),
            (PositionState::Bought, PositionState::Monitoring)
                | (PositionState::Monitoring, PositionState::Sold)
                | (PositionState::Monitoring, PositionState::Failed)
        )
    }
}

/// One bought-and-not-yet-sold token
#[derive(Debug, Clone)]
pub struct Position {
    /// Log correlation id
    pub id: Uuid,
    /// Token contract
    pub token: Address,
    /// Native currency committed (wei); also the PnL denominator
    pub buy_amount: U256,
    /// Buy transaction hash
    pub buy_tx: H256,
    /// Sell transaction hash once sold
    pub sell_tx: Option<H256>,
    /// Last computed PnL multiple
    pub last_pnl: Option<f64>,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    state: PositionState,
}

impl Position {
    /// New position in `Bought`
    pub fn new(token: Address, buy_amount: U256, buy_tx: H256) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            buy_amount,
            buy_tx,
            sell_tx: None,
            last_pnl: None,
            opened_at: chrono::Utc::now(),
            state: PositionState::Bought,
        }
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    /// Committed amount in native units (ETH), the PnL denominator
    pub fn buy_amount_native(&self) -> f64 {
        ethers::utils::format_ether(self.buy_amount)
            .parse()
            .unwrap_or(0.0)
    }

    /// Move along `Bought -> Monitoring -> {Sold | Failed}`; nothing else
    pub fn transition(&mut self, next: PositionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record the confirmed sell and enter `Sold`
    pub fn mark_sold(&mut self, sell_tx: H256) -> Result<()> {
        self.transition(PositionState::Sold)?;
        self.sell_tx = Some(sell_tx);
        Ok(())
    }

    /// Time since the buy confirmed
    pub fn held_for(&self) -> chrono::Duration {
        chrono::Utc::now() - self.opened_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_position() -> Position {
        Position::new(
            Address::from_low_u64_be(0x70),
            ethers::utils::parse_ether("0.005").unwrap(),
            H256::from_low_u64_be(1),
        )
    }

    #[test]
    fn test_new_position_is_bought() {
        let position = test_position();
        assert_eq!(position.state(), PositionState::Bought);
        assert!(position.sell_tx.is_none());
        assert!((position.buy_amount_native() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut position = test_position();
        position.transition(PositionState::Monitoring).unwrap();
        position.mark_sold(H256::from_low_u64_be(2)).unwrap();

        assert_eq!(position.state(), PositionState::Sold);
        assert_eq!(position.sell_tx, Some(H256::from_low_u64_be(2)));
        assert!(position.state().is_terminal());
    }

    #[test]
    fn test_cannot_sell_before_monitoring() {
        let mut position = test_position();
        let err = position.mark_sold(H256::zero()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: PositionState::Bought,
                to: PositionState::Sold
            }
        ));
        assert!(position.sell_tx.is_none());
    }

    #[test]
    fn test_no_transition_back_to_bought() {
        let mut position = test_position();
        position.transition(PositionState::Monitoring).unwrap();
        assert!(position.transition(PositionState::Bought).is_err());

        position.transition(PositionState::Failed).unwrap();
        assert!(position.transition(PositionState::Monitoring).is_err());
        assert!(position.transition(PositionState::Sold).is_err());
    }
}
