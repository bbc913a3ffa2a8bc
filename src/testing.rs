//! In-memory chain, router, ledger, price and notification fakes

use async_trait::async_trait;
use ethers::types::{
    Address, Block, Transaction, TransactionReceipt, TxHash, H256, U256, U64,
};
use std::collections::{HashMap, HashSet};
use std::future::pending;
use std::sync::Mutex;
use std::time::Duration;

use crate::chain::{ChainClient, TokenLedger};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::position::PriceSource;
use crate::stream::{Deployment, DeploymentHandler};
use crate::trading::{GasParams, SwapBackend, SwapOrder, SwapSettings};

pub fn block(height: u64, transactions: Vec<Transaction>) -> Block<Transaction> {
    Block {
        number: Some(U64::from(height)),
        hash: Some(H256::from_low_u64_be(height)),
        transactions,
        ..Default::default()
    }
}

/// Contract creation from `from`
pub fn creation_tx(from: Address, nonce: u64, hash: u64) -> Transaction {
    Transaction {
        hash: H256::from_low_u64_be(hash),
        from,
        to: None,
        nonce: U256::from(nonce),
        ..Default::default()
    }
}

pub fn call_tx(from: Address, to: Address, hash: u64) -> Transaction {
    Transaction {
        hash: H256::from_low_u64_be(hash),
        from,
        to: Some(to),
        ..Default::default()
    }
}

pub fn creation_receipt(
    tx_hash: H256,
    contract_address: Option<Address>,
    success: bool,
) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: tx_hash,
        contract_address,
        status: Some(if success { U64::one() } else { U64::zero() }),
        ..Default::default()
    }
}

/// Poll `condition` until it holds; panics after one second
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn swap_settings() -> SwapSettings {
    SwapSettings {
        wrapped_native: Address::from_low_u64_be(0xee),
        recipient: Address::from_low_u64_be(0x11),
        slippage_tolerance: 0.06,
        deadline: Duration::from_secs(120),
        gas: GasParams {
            limit: U256::from(200_000),
            price: U256::from(5_000_000_000u64),
        },
        confirmation_timeout: Duration::from_secs(2),
        approve_before_sell: true,
        dry_run: false,
    }
}

#[derive(Default)]
struct ChainState {
    height: u64,
    blocks: HashMap<u64, Block<Transaction>>,
    receipts: HashMap<H256, TransactionReceipt>,
    failing_heights: HashSet<u64>,
    fail_block_number: bool,
    fail_receipts: bool,
    fetched: Vec<u64>,
}

/// Node with a scripted chain
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn add_block(&self, block: Block<Transaction>) {
        let height = block.number.map(|n| n.as_u64()).unwrap_or_default();
        self.state.lock().unwrap().blocks.insert(height, block);
    }

    pub fn add_receipt(&self, receipt: TransactionReceipt) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.transaction_hash, receipt);
    }

    pub fn fail_height(&self, height: u64) {
        self.state.lock().unwrap().failing_heights.insert(height);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_heights.clear();
        state.fail_block_number = false;
        state.fail_receipts = false;
    }

    pub fn fail_block_number(&self, fail: bool) {
        self.state.lock().unwrap().fail_block_number = fail;
    }

    pub fn fail_receipts(&self, fail: bool) {
        self.state.lock().unwrap().fail_receipts = fail;
    }

    /// Heights served by `block_with_txs`, in request order
    pub fn fetched_heights(&self) -> Vec<u64> {
        self.state.lock().unwrap().fetched.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn block_number(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_block_number {
            return Err(Error::RpcQuery("eth_blockNumber unavailable".to_string()));
        }
        Ok(state.height)
    }

    async fn block_with_txs(&self, height: u64) -> Result<Option<Block<Transaction>>> {
        let mut state = self.state.lock().unwrap();
        if state.failing_heights.contains(&height) {
            return Err(Error::RpcQuery(format!("block {} unavailable", height)));
        }
        let block = state.blocks.get(&height).cloned();
        if block.is_some() {
            state.fetched.push(height);
        }
        Ok(block)
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let state = self.state.lock().unwrap();
        if state.fail_receipts {
            return Err(Error::RpcQuery("eth_getTransactionReceipt unavailable".to_string()));
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }
}

/// Collects every deployment it is handed
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<Deployment>>,
}

impl RecordingHandler {
    pub fn tokens(&self) -> Vec<Address> {
        self.seen.lock().unwrap().iter().map(|d| d.token).collect()
    }
}

#[async_trait]
impl DeploymentHandler for RecordingHandler {
    async fn on_deployment(&self, deployment: Deployment) {
        self.seen.lock().unwrap().push(deployment);
    }
}

#[derive(Default)]
struct RouterState {
    quoted: Vec<(U256, Vec<Address>)>,
    orders: Vec<SwapOrder>,
    approvals: Vec<(Address, U256)>,
    submit_attempts: usize,
    failing_submits: usize,
    fail_quotes: bool,
    approval_outage: bool,
    revert: bool,
    /// Submitted hashes that will be mined with status 0
    reverted: HashSet<TxHash>,
    hang: bool,
}

/// Router that quotes a fixed output and confirms everything it accepts.
/// While confirmations hang, submitted swaps count as not yet mined.
pub struct FakeRouter {
    quote_out: U256,
    state: Mutex<RouterState>,
}

impl FakeRouter {
    pub fn new(quote_out: U256) -> Self {
        Self {
            quote_out,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Accepted orders
    pub fn orders(&self) -> Vec<SwapOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn quoted(&self) -> Vec<(U256, Vec<Address>)> {
        self.state.lock().unwrap().quoted.clone()
    }

    pub fn approvals(&self) -> Vec<(Address, U256)> {
        self.state.lock().unwrap().approvals.clone()
    }

    pub fn submit_attempts(&self) -> usize {
        self.state.lock().unwrap().submit_attempts
    }

    pub fn fail_next_submits(&self, count: usize) {
        self.state.lock().unwrap().failing_submits = count;
    }

    pub fn fail_quotes(&self, fail: bool) {
        self.state.lock().unwrap().fail_quotes = fail;
    }

    /// Allowance checks fail with an RPC timeout instead of an approval error
    pub fn approval_outage(&self, outage: bool) {
        self.state.lock().unwrap().approval_outage = outage;
    }

    /// Swaps submitted from now on revert when mined
    pub fn revert_swaps(&self, revert: bool) {
        self.state.lock().unwrap().revert = revert;
    }

    pub fn hang_confirmations(&self, hang: bool) {
        self.state.lock().unwrap().hang = hang;
    }
}

#[async_trait]
impl SwapBackend for FakeRouter {
    async fn amounts_out(&self, amount_in: U256, path: Vec<Address>) -> Result<Vec<U256>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_quotes {
            return Err(Error::SwapQuote("execution reverted: INSUFFICIENT_LIQUIDITY".to_string()));
        }
        state.quoted.push((amount_in, path.clone()));

        let mut amounts = vec![self.quote_out; path.len()];
        amounts[0] = amount_in;
        Ok(amounts)
    }

    async fn ensure_allowance(&self, token: Address, amount: U256, _gas: GasParams) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.approval_outage {
            return Err(Error::RpcTimeout(500));
        }
        state.approvals.push((token, amount));
        Ok(())
    }

    async fn submit(&self, order: &SwapOrder) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.submit_attempts += 1;
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(Error::SwapSubmission("connection reset by peer".to_string()));
        }
        state.orders.push(order.clone());
        let tx_hash = H256::from_low_u64_be(0x5000 + state.orders.len() as u64);
        if state.revert {
            state.reverted.insert(tx_hash);
        }
        Ok(tx_hash)
    }

    async fn confirm(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        match self.mined(tx_hash) {
            Some(receipt) => Ok(Some(receipt)),
            None => pending().await,
        }
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        Ok(self.mined(tx_hash))
    }
}

impl FakeRouter {
    fn mined(&self, tx_hash: TxHash) -> Option<TransactionReceipt> {
        let state = self.state.lock().unwrap();
        if state.hang {
            return None;
        }

        let reverted = state.reverted.contains(&tx_hash);
        Some(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(1)),
            status: Some(if reverted { U64::zero() } else { U64::one() }),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, U256>,
    fail: bool,
    decimals_calls: usize,
}

/// Same balance and decimals for every token unless overridden
pub struct FakeLedger {
    default_balance: U256,
    decimals: u8,
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new(default_balance: U256, decimals: u8) -> Self {
        Self {
            default_balance,
            decimals,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn set_balance(&self, token: Address, balance: U256) {
        self.state.lock().unwrap().balances.insert(token, balance);
    }

    pub fn fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn decimals_calls(&self) -> usize {
        self.state.lock().unwrap().decimals_calls
    }
}

#[async_trait]
impl TokenLedger for FakeLedger {
    async fn balance_of(&self, token: Address, _owner: Address) -> Result<U256> {
        let state = self.state.lock().unwrap();
        if state.fail {
            return Err(Error::TokenQuery("balanceOf timed out".to_string()));
        }
        Ok(state
            .balances
            .get(&token)
            .copied()
            .unwrap_or(self.default_balance))
    }

    async fn decimals(&self, _token: Address) -> Result<u8> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(Error::TokenQuery("decimals timed out".to_string()));
        }
        state.decimals_calls += 1;
        Ok(self.decimals)
    }
}

/// One price for every token
pub struct FakePrices {
    price: Mutex<f64>,
    fail: Mutex<bool>,
}

impl FakePrices {
    pub fn new(price: f64) -> Self {
        Self {
            price: Mutex::new(price),
            fail: Mutex::new(false),
        }
    }

    pub fn set(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl PriceSource for FakePrices {
    async fn price_in_native(&self, token: Address, _decimals: u8) -> Result<f64> {
        if *self.fail.lock().unwrap() {
            return Err(Error::PriceQuery(format!("{:?}: no pool", token)));
        }
        Ok(*self.price.lock().unwrap())
    }
}

/// Keeps delivered messages; can be switched to fail
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    attempts: Mutex<usize>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;
        if *self.fail.lock().unwrap() {
            return Err(Error::Notification("502 Bad Gateway".to_string()));
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
