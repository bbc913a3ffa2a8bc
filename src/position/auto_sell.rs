//! Take-profit trigger
//!
//! WARNING: the target is checked on a polling interval. A token can spike
//! through the target and back between two checks; the sell only happens if
//! the multiple still holds when observed.

use ethers::types::U256;
use ethers::utils::format_units;

use crate::error::{Error, Result};

/// Sell decision for a position
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    /// Observed value / committed amount
    pub pnl: f64,
    /// Target multiple that was met
    pub target: f64,
    /// Amount to sell (always the full balance)
    pub sell_amount: U256,
}

/// `10^decimals`, or `None` past 77 where it no longer fits in 256 bits.
/// `decimals()` is a `uint8` chosen by the deployer, so 78..=255 do occur.
pub fn unit_scale(decimals: u8) -> Option<U256> {
    U256::from(10u64).checked_pow(U256::from(decimals))
}

/// Token balance in whole units
pub fn balance_in_units(balance: U256, decimals: u8) -> Result<f64> {
    if unit_scale(decimals).is_none() {
        return Err(Error::TokenQuery(format!("Unsupported decimals: {}", decimals)));
    }

    format_units(balance, decimals as u32)
        .map_err(|e| Error::TokenQuery(format!("Cannot scale balance: {}", e)))?
        .parse::<f64>()
        .map_err(|e| Error::TokenQuery(format!("Cannot scale balance: {}", e)))
}

/// `(balance / 10^decimals * price) / committed`
pub fn pnl_multiple(balance: U256, decimals: u8, price_in_native: f64, committed_native: f64) -> Result<f64> {
    if !(committed_native > 0.0) {
        return Err(Error::Internal(format!(
            "committed amount must be positive, got {}",
            committed_native
        )));
    }

    let current_value = balance_in_units(balance, decimals)? * price_in_native;
    Ok(current_value / committed_native)
}

/// Fire exactly when `pnl >= target`
pub fn check_trigger(pnl: f64, target: f64, balance: U256) -> Option<ExitSignal> {
    if pnl >= target && !balance.is_zero() {
        Some(ExitSignal {
            pnl,
            target,
            sell_amount: balance,
        })
    } else {
        None
    }
}
