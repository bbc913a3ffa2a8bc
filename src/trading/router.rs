//! Uniswap V2 router backend
//!
//! Quotes with `getAmountsOut`, buys with `swapExactETHForTokens` and sells
//! with `swapExactTokensForETH`. Transactions are legacy-typed with the
//! configured gas limit and price.

use async_trait::async_trait;
use ethers::providers::{Middleware, PendingTransaction};
use ethers::types::{Address, TransactionReceipt, TxHash, U256, U64};
use std::sync::Arc;
use tracing::{debug, info};

use super::{GasParams, SwapBackend, SwapDirection, SwapOrder};
use crate::chain::contracts::{IUniswapV2Router02, IERC20};
use crate::chain::provider::SignerClient;
use crate::error::{Error, Result};

/// Router contract bound to the signing client
pub struct UniswapV2Router {
    client: Arc<SignerClient>,
    router: IUniswapV2Router02<SignerClient>,
    address: Address,
}

impl UniswapV2Router {
    pub fn new(client: Arc<SignerClient>, address: Address) -> Self {
        Self {
            router: IUniswapV2Router02::new(address, client.clone()),
            client,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl SwapBackend for UniswapV2Router {
    async fn amounts_out(&self, amount_in: U256, path: Vec<Address>) -> Result<Vec<U256>> {
        self.router
            .get_amounts_out(amount_in, path)
            .call()
            .await
            .map_err(|e| Error::SwapQuote(e.to_string()))
    }

    async fn ensure_allowance(&self, token: Address, amount: U256, gas: GasParams) -> Result<()> {
        let erc20 = IERC20::new(token, self.client.clone());
        let owner = self.client.inner().address();

        let allowance = erc20
            .allowance(owner, self.address)
            .call()
            .await
            .map_err(|e| Error::Approval(e.to_string()))?;

        if allowance >= amount {
            debug!("Sufficient allowance for {:?}: {} >= {}", token, allowance, amount);
            return Ok(());
        }

        // Approve max uint256 so later sells of the same token skip this
        info!("Approving router {:?} for {:?}", self.address, token);
        let call = erc20
            .approve(self.address, U256::MAX)
            .legacy()
            .gas(gas.limit)
            .gas_price(gas.price);

        let pending = call
            .send()
            .await
            .map_err(|e| Error::Approval(e.to_string()))?;

        let receipt = pending
            .await
            .map_err(|e| Error::Approval(e.to_string()))?
            .ok_or_else(|| Error::Approval("approval transaction dropped".to_string()))?;

        if receipt.status == Some(U64::zero()) {
            return Err(Error::Approval(format!(
                "approval {:?} reverted",
                receipt.transaction_hash
            )));
        }

        info!("Approval confirmed: {:?}", receipt.transaction_hash);
        Ok(())
    }

    async fn submit(&self, order: &SwapOrder) -> Result<TxHash> {
        let call = match order.direction {
            SwapDirection::Buy => self
                .router
                .swap_exact_eth_for_tokens(
                    order.min_amount_out,
                    order.path.clone(),
                    order.recipient,
                    order.deadline,
                )
                .value(order.amount_in),
            SwapDirection::Sell => self.router.swap_exact_tokens_for_eth(
                order.amount_in,
                order.min_amount_out,
                order.path.clone(),
                order.recipient,
                order.deadline,
            ),
        };

        let call = call.legacy().gas(order.gas.limit).gas_price(order.gas.price);

        let pending = call
            .send()
            .await
            .map_err(|e| Error::SwapSubmission(e.to_string()))?;

        Ok(pending.tx_hash())
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        PendingTransaction::new(tx_hash, self.client.provider())
            .await
            .map_err(|e| Error::SwapConfirmation(e.to_string()))
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.client
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| Error::RpcQuery(e.to_string()))
    }
}
