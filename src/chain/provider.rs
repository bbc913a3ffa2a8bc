//! `ethers` implementation of the chain traits
//!
//! One HTTP provider wrapped in a signing middleware is shared by the poller,
//! the monitors and the router backend. A nonce manager sits on top of the
//! signer: buys, approvals and sells go out concurrently from one wallet,
//! and each must take the next nonce before it is signed.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use ethers::middleware::{NonceManagerMiddleware, SignerMiddleware};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256, U256};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::contracts::IERC20;
use super::{ChainClient, TokenLedger};
use crate::config::{RpcConfig, WalletConfig};
use crate::error::{Error, Result};

/// Provider + local signer + local nonce counter, the client every contract
/// binding is built on
pub type SignerClient = NonceManagerMiddleware<SignerMiddleware<Provider<Http>, LocalWallet>>;

/// Stack the signer and the nonce manager over a provider.
///
/// `SignerMiddleware` only asks the node for a nonce when the transaction has
/// none, and the node answers from the latest block, so two sends in flight
/// would share one. The nonce manager fills it first from a local counter.
pub fn signing_client(provider: Provider<Http>, signer: LocalWallet) -> SignerClient {
    let address = signer.address();
    NonceManagerMiddleware::new(SignerMiddleware::new(provider, signer), address)
}

/// Chain access over JSON-RPC
pub struct EvmChain {
    client: Arc<SignerClient>,
    timeout: Duration,
}

impl EvmChain {
    /// Build the client and probe the node until it answers
    pub async fn connect(rpc: &RpcConfig, wallet: &WalletConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc.endpoint.as_str())
            .map_err(|e| Error::RpcConnection(format!("Invalid RPC endpoint: {}", e)))?
            .interval(Duration::from_millis(rpc.receipt_poll_ms));

        let signer = parse_signer(&wallet.private_key, rpc.chain_id)?;

        if let Some(expected) = wallet.address {
            if expected != signer.address() {
                return Err(Error::InvalidKey(format!(
                    "key controls {:?} but wallet.address is {:?}",
                    signer.address(),
                    expected
                )));
            }
        }

        let chain = Self {
            client: Arc::new(signing_client(provider, signer)),
            timeout: Duration::from_millis(rpc.timeout_ms),
        };

        // Probe connectivity with exponential backoff
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(chain.timeout * rpc.max_retries.max(1)),
            ..Default::default()
        };

        let height = retry(backoff, || async {
            match chain.block_number().await {
                Ok(height) => Ok(height),
                Err(e) if e.is_retryable() => {
                    warn!("RPC probe failed, retrying: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    error!("RPC probe failed permanently: {}", e);
                    Err(backoff::Error::permanent(e))
                }
            }
        })
        .await
        .map_err(|e| Error::RpcConnection(e.to_string()))?;

        info!(
            "Connected to chain {} at height {} as {:?}",
            rpc.chain_id,
            height,
            chain.address()
        );

        Ok(chain)
    }

    /// Shared signing client
    pub fn client(&self) -> Arc<SignerClient> {
        self.client.clone()
    }

    /// Address of the trading wallet
    pub fn address(&self) -> Address {
        self.client.inner().address()
    }

    /// Native currency balance of the trading wallet
    pub async fn native_balance(&self) -> Result<U256> {
        self.timed(self.client.get_balance(self.address(), None), Error::RpcQuery)
            .await
    }

    /// Run an RPC future under the configured request timeout
    async fn timed<T, E, F>(&self, fut: F, wrap: fn(String) -> Error) -> Result<T>
    where
        E: Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| wrap(e.to_string())),
            Err(_) => Err(Error::RpcTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Parse a hex private key (with or without 0x) into a chain-bound signer
pub fn parse_signer(private_key: &str, chain_id: u64) -> Result<LocalWallet> {
    let key = private_key.trim();
    if key.is_empty() {
        return Err(Error::MissingEnvVar("PRIVATE_KEY".to_string()));
    }

    let wallet: LocalWallet = key
        .parse()
        .map_err(|e| Error::InvalidKey(format!("{}", e)))?;

    Ok(wallet.with_chain_id(chain_id))
}

#[async_trait]
impl ChainClient for EvmChain {
    async fn block_number(&self) -> Result<u64> {
        let height = self
            .timed(self.client.get_block_number(), Error::RpcQuery)
            .await?;
        Ok(height.as_u64())
    }

    async fn block_with_txs(&self, height: u64) -> Result<Option<Block<Transaction>>> {
        self.timed(self.client.get_block_with_txs(height), Error::RpcQuery)
            .await
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.timed(self.client.get_transaction_receipt(tx_hash), Error::RpcQuery)
            .await
    }
}

#[async_trait]
impl TokenLedger for EvmChain {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let contract = IERC20::new(token, self.client.clone());
        self.timed(contract.balance_of(owner).call(), Error::TokenQuery)
            .await
    }

    async fn decimals(&self, token: Address) -> Result<u8> {
        let contract = IERC20::new(token, self.client.clone());
        self.timed(contract.decimals().call(), Error::TokenQuery)
            .await
    }
}
