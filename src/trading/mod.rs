//! Trading module - AMM swap execution
//!
//! The executor owns the swap procedure (path, quote, slippage bound,
//! deadline, confirmation). The router backend is the only place that
//! speaks to the router contract.

pub mod executor;
pub mod router;

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, TxHash, U256};

use crate::error::Result;

pub use executor::{SubmittedSwap, SwapExecutor, SwapSettings};
pub use router::UniswapV2Router;

/// Swap direction relative to the native currency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Native currency in, token out
    Buy,
    /// Token in, native currency out
    Sell,
}

impl std::fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapDirection::Buy => write!(f, "buy"),
            SwapDirection::Sell => write!(f, "sell"),
        }
    }
}

/// Router quote for one swap; lives only inside a single swap call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuote {
    pub amount_in: U256,
    pub path: Vec<Address>,
    /// Output of the final hop
    pub amount_out: U256,
}

/// Fixed gas parameters; never estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub limit: U256,
    pub price: U256,
}

/// Fully specified swap ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOrder {
    pub direction: SwapDirection,
    pub amount_in: U256,
    /// Router reverts rather than deliver less than this
    pub min_amount_out: U256,
    pub path: Vec<Address>,
    pub recipient: Address,
    /// Unix seconds after which the router rejects the swap
    pub deadline: U256,
    pub gas: GasParams,
}

/// Router contract operations the executor relies on
#[async_trait]
pub trait SwapBackend: Send + Sync {
    /// `getAmountsOut`: per-hop amounts along `path`
    async fn amounts_out(&self, amount_in: U256, path: Vec<Address>) -> Result<Vec<U256>>;

    /// Make sure the router may pull `amount` of `token` from the wallet
    async fn ensure_allowance(&self, token: Address, amount: U256, gas: GasParams) -> Result<()>;

    /// Sign and broadcast; returns once the node accepted the transaction
    async fn submit(&self, order: &SwapOrder) -> Result<TxHash>;

    /// Wait for inclusion. `None` when the transaction was dropped.
    async fn confirm(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>>;

    /// Receipt if already mined, without waiting
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>>;
}
