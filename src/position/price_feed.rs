//! Token price in native currency
//!
//! The router is the only pricing authority: the price of one whole token is
//! what `getAmountsOut` would pay for it along `[token, wrapped native]`.
//! Thin pools make this an execution price rather than a mid price.

use async_trait::async_trait;
use ethers::types::Address;
use ethers::utils::format_ether;
use std::sync::Arc;
use tracing::debug;

use super::auto_sell::unit_scale;
use crate::error::{Error, Result};
use crate::trading::SwapBackend;

/// Price of one whole token, in native units
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn price_in_native(&self, token: Address, decimals: u8) -> Result<f64>;
}

/// Prices a token by quoting a one-token sell through the router
pub struct RouterPriceSource {
    router: Arc<dyn SwapBackend>,
    wrapped_native: Address,
}

impl RouterPriceSource {
    pub fn new(router: Arc<dyn SwapBackend>, wrapped_native: Address) -> Self {
        Self {
            router,
            wrapped_native,
        }
    }
}

#[async_trait]
impl PriceSource for RouterPriceSource {
    async fn price_in_native(&self, token: Address, decimals: u8) -> Result<f64> {
        let one_token = unit_scale(decimals).ok_or_else(|| {
            Error::PriceQuery(format!("{:?}: unsupported decimals {}", token, decimals))
        })?;
        let amounts = self
            .router
            .amounts_out(one_token, vec![token, self.wrapped_native])
            .await
            .map_err(|e| Error::PriceQuery(format!("{:?}: {}", token, e)))?;

        let native_out = amounts
            .get(1)
            .copied()
            .ok_or_else(|| Error::PriceQuery(format!("{:?}: empty quote", token)))?;

        let price = format_ether(native_out)
            .parse::<f64>()
            .map_err(|e| Error::PriceQuery(format!("{:?}: {}", token, e)))?;

        debug!("Price {:?}: {} native", token, price);
        Ok(price)
    }
}
