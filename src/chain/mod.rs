//! Chain access - the RPC node seen as a query/submit interface
//!
//! The poller, detector and monitors only talk to the node through the
//! traits below, so they can be driven by in-memory fakes in tests.

pub mod contracts;
pub mod provider;

use async_trait::async_trait;
use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256, U256};

use crate::error::Result;

pub use provider::EvmChain;

/// Block and receipt queries against the node
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain height
    async fn block_number(&self) -> Result<u64>;

    /// Full block with transaction bodies. `None` when the node no longer
    /// knows the height (reorged away or not yet served).
    async fn block_with_txs(&self, height: u64) -> Result<Option<Block<Transaction>>>;

    /// Receipt of a mined transaction
    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;
}

/// ERC-20 reads needed to value a position
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;

    async fn decimals(&self, token: Address) -> Result<u8>;
}
