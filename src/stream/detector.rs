//! Deployment detector
//!
//! A transaction is a deployment when it is sent by the watched deployer and
//! has no destination (contract creation). Matches keep block order.

use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256, U64};
use ethers::utils::get_contract_address;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::error::Result;

/// A contract deployed by the watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Created contract (the token to buy)
    pub token: Address,
    /// Creating transaction
    pub tx_hash: H256,
    /// Height the creation was mined at
    pub block_number: u64,
}

/// Scans blocks for contract creations by one deployer
#[derive(Debug, Clone)]
pub struct DeploymentDetector {
    deployer: Address,
}

impl DeploymentDetector {
    /// Addresses are compared as bytes, so hex casing never matters
    pub fn new(deployer: Address) -> Self {
        Self { deployer }
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    /// Contract creation sent by the watched deployer
    pub fn is_deployment(&self, tx: &Transaction) -> bool {
        tx.from == self.deployer && tx.to.is_none()
    }

    /// Matching transactions in block order
    pub fn scan<'a>(&self, block: &'a Block<Transaction>) -> Vec<&'a Transaction> {
        block
            .transactions
            .iter()
            .filter(|tx| self.is_deployment(tx))
            .collect()
    }

    /// Scan a block and resolve each match to its created contract address.
    ///
    /// Any receipt fetch failure fails the whole block so the poller retries
    /// it as a unit and never dispatches half a block.
    pub async fn detect(
        &self,
        block: &Block<Transaction>,
        chain: &dyn ChainClient,
    ) -> Result<Vec<Deployment>> {
        let candidates = self.scan(block);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let height = block.number.map(|n| n.as_u64()).unwrap_or_default();
        debug!(
            "Block {} has {} creation(s) from {:?}",
            height,
            candidates.len(),
            self.deployer
        );

        // try_join_all preserves input order
        let receipts = try_join_all(
            candidates
                .iter()
                .map(|tx| chain.transaction_receipt(tx.hash)),
        )
        .await?;

        let deployments = candidates
            .into_iter()
            .zip(receipts)
            .filter_map(|(tx, receipt)| Self::resolve(tx, receipt.as_ref(), height))
            .collect::<Vec<_>>();

        for deployment in &deployments {
            info!(
                "Deployment detected: token {:?} in block {} (tx {:?})",
                deployment.token, deployment.block_number, deployment.tx_hash
            );
        }

        Ok(deployments)
    }

    /// Created address from the receipt, or derived from sender and nonce
    /// when the node omits it. Failed creations yield nothing.
    fn resolve(
        tx: &Transaction,
        receipt: Option<&TransactionReceipt>,
        height: u64,
    ) -> Option<Deployment> {
        if let Some(receipt) = receipt {
            if receipt.status == Some(U64::zero()) {
                warn!("Creation {:?} reverted, nothing to buy", tx.hash);
                return None;
            }
        }

        let token = receipt
            .and_then(|r| r.contract_address)
            .unwrap_or_else(|| get_contract_address(tx.from, tx.nonce));

        Some(Deployment {
            token,
            tx_hash: tx.hash,
            block_number: height,
        })
    }
}
