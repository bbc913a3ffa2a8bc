//! Deploy Sniper Library
//!
//! Watches an EVM chain for contracts created by one deployer, buys each new
//! token through a Uniswap-V2 router and sells it once a PnL multiple is hit.

pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod position;
pub mod stream;
pub mod trading;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
