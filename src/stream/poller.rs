//! Chain poller
//!
//! Polls the head height on a fixed interval and walks every new height in
//! ascending order. The scan cursor is owned here and only advanced after a
//! block's deployments have been handed off, so a failed fetch leaves the
//! cursor in place and the same range is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detector::DeploymentDetector;
use super::DeploymentHandler;
use crate::chain::ChainClient;
use crate::config::WatchConfig;
use crate::error::Result;

/// Last height the poller has fully processed. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor(Option<u64>);

impl ScanCursor {
    pub fn at(height: u64) -> Self {
        Self(Some(height))
    }

    pub fn last(&self) -> Option<u64> {
        self.0
    }

    /// Move to `height`; never moves backwards
    fn advance(&mut self, height: u64) {
        if self.0.map_or(true, |last| height > last) {
            self.0 = Some(height);
        }
    }
}

/// Fetches new blocks and feeds deployments to a handler
pub struct ChainPoller {
    chain: Arc<dyn ChainClient>,
    detector: DeploymentDetector,
    cursor: ScanCursor,
    poll_interval: Duration,
    max_blocks_per_tick: u64,
}

impl ChainPoller {
    pub fn new(chain: Arc<dyn ChainClient>, config: &WatchConfig) -> Self {
        Self {
            chain,
            detector: DeploymentDetector::new(config.deployer),
            cursor: ScanCursor::default(),
            poll_interval: config.poll_interval(),
            max_blocks_per_tick: config.max_blocks_per_tick.max(1),
        }
    }

    /// Start from a known height instead of the head seen on the first tick
    pub fn with_cursor(mut self, cursor: ScanCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    /// One tick. Returns the new cursor height when it advanced.
    ///
    /// The first tick only records the head; history before startup is
    /// never scanned.
    pub async fn poll(&mut self, handler: &dyn DeploymentHandler) -> Result<Option<u64>> {
        let head = self.chain.block_number().await?;

        let last = match self.cursor.last() {
            Some(last) => last,
            None => {
                info!("Watching {:?} from block {}", self.detector.deployer(), head);
                self.cursor.advance(head);
                return Ok(Some(head));
            }
        };

        if head <= last {
            debug!("No new blocks (head {}, cursor {})", head, last);
            return Ok(None);
        }

        let end = head.min(last.saturating_add(self.max_blocks_per_tick));
        if end < head {
            debug!("Catching up: scanning {}..={} of {} pending", last + 1, end, head - last);
        }

        for height in (last + 1)..=end {
            let block = match self.chain.block_with_txs(height).await? {
                Some(block) => block,
                None => {
                    warn!("Block {} not served by node, skipping", height);
                    self.cursor.advance(height);
                    continue;
                }
            };

            let deployments = self.detector.detect(&block, self.chain.as_ref()).await?;
            for deployment in deployments {
                handler.on_deployment(deployment).await;
            }

            self.cursor.advance(height);
        }

        Ok(Some(end))
    }

    /// Poll until cancelled. Failures are logged and retried next tick.
    pub async fn run(mut self, handler: Arc<dyn DeploymentHandler>, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Chain poller started ({}ms interval)",
            self.poll_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll(handler.as_ref()) => {
                    if let Err(e) = result {
                        warn!(
                            "Poll failed at cursor {:?}, will retry: {}",
                            self.cursor.last(),
                            e
                        );
                    }
                }
            }
        }

        info!("Chain poller stopped at block {:?}", self.cursor.last());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block, creation_receipt, creation_tx, FakeChain, RecordingHandler};
    use ethers::types::Address;

    fn deployer() -> Address {
        Address::from_low_u64_be(0xd0)
    }

    fn watch() -> WatchConfig {
        WatchConfig {
            deployer: deployer(),
            block_poll_interval_ms: 10,
            max_blocks_per_tick: 50,
        }
    }

    /// Chain with one deployment at `height` creating `token`
    fn deploy_at(chain: &FakeChain, height: u64, nonce: u64, token: u64) {
        let tx = creation_tx(deployer(), nonce, height * 1000 + nonce);
        chain.add_receipt(creation_receipt(
            tx.hash,
            Some(Address::from_low_u64_be(token)),
            true,
        ));
        chain.add_block(block(height, vec![tx]));
    }

    #[tokio::test]
    async fn test_first_poll_only_sets_cursor() {
        let chain = Arc::new(FakeChain::new());
        deploy_at(&chain, 100, 0, 0xaa);
        chain.set_height(100);

        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &watch());

        assert_eq!(poller.poll(&handler).await.unwrap(), Some(100));
        assert_eq!(poller.cursor().last(), Some(100));
        assert!(handler.tokens().is_empty());
        assert!(chain.fetched_heights().is_empty());
    }

    #[tokio::test]
    async fn test_scans_every_new_height_in_order() {
        let chain = Arc::new(FakeChain::new());
        for height in 11..=13 {
            chain.add_block(block(height, vec![]));
        }
        deploy_at(&chain, 12, 0, 0xaa);
        deploy_at(&chain, 14, 1, 0xbb);
        chain.set_height(14);

        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &watch()).with_cursor(ScanCursor::at(10));

        assert_eq!(poller.poll(&handler).await.unwrap(), Some(14));
        assert_eq!(chain.fetched_heights(), vec![11, 12, 13, 14]);
        assert_eq!(
            handler.tokens(),
            vec![Address::from_low_u64_be(0xaa), Address::from_low_u64_be(0xbb)]
        );
    }

    #[tokio::test]
    async fn test_repoll_without_new_blocks_detects_nothing() {
        let chain = Arc::new(FakeChain::new());
        deploy_at(&chain, 11, 0, 0xaa);
        chain.set_height(11);

        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &watch()).with_cursor(ScanCursor::at(10));

        poller.poll(&handler).await.unwrap();
        assert_eq!(handler.tokens().len(), 1);

        assert_eq!(poller.poll(&handler).await.unwrap(), None);
        assert_eq!(poller.poll(&handler).await.unwrap(), None);
        assert_eq!(handler.tokens().len(), 1);
        assert_eq!(chain.fetched_heights(), vec![11]);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cursor_for_retry() {
        let chain = Arc::new(FakeChain::new());
        chain.add_block(block(11, vec![]));
        deploy_at(&chain, 12, 0, 0xaa);
        chain.set_height(12);
        chain.fail_height(12);

        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &watch()).with_cursor(ScanCursor::at(10));

        assert!(poller.poll(&handler).await.is_err());
        assert_eq!(poller.cursor().last(), Some(11));
        assert!(handler.tokens().is_empty());

        chain.clear_failures();
        assert_eq!(poller.poll(&handler).await.unwrap(), Some(12));
        assert_eq!(handler.tokens(), vec![Address::from_low_u64_be(0xaa)]);
    }

    #[tokio::test]
    async fn test_head_query_failure_is_an_error_without_progress() {
        let chain = Arc::new(FakeChain::new());
        chain.set_height(20);
        chain.fail_block_number(true);

        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &watch()).with_cursor(ScanCursor::at(10));

        assert!(poller.poll(&handler).await.is_err());
        assert_eq!(poller.cursor().last(), Some(10));
    }

    #[tokio::test]
    async fn test_missing_block_is_skipped() {
        let chain = Arc::new(FakeChain::new());
        deploy_at(&chain, 12, 0, 0xaa);
        chain.set_height(12);

        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &watch()).with_cursor(ScanCursor::at(10));

        assert_eq!(poller.poll(&handler).await.unwrap(), Some(12));
        assert_eq!(handler.tokens(), vec![Address::from_low_u64_be(0xaa)]);
    }

    #[tokio::test]
    async fn test_catch_up_is_bounded_per_tick() {
        let chain = Arc::new(FakeChain::new());
        for height in 1..=5 {
            chain.add_block(block(height, vec![]));
        }
        chain.set_height(5);

        let mut config = watch();
        config.max_blocks_per_tick = 2;
        let handler = RecordingHandler::default();
        let mut poller = ChainPoller::new(chain.clone(), &config).with_cursor(ScanCursor::at(0));

        assert_eq!(poller.poll(&handler).await.unwrap(), Some(2));
        assert_eq!(poller.poll(&handler).await.unwrap(), Some(4));
        assert_eq!(poller.poll(&handler).await.unwrap(), Some(5));
        assert_eq!(chain.fetched_heights(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let mut cursor = ScanCursor::at(10);
        cursor.advance(5);
        assert_eq!(cursor.last(), Some(10));
        cursor.advance(11);
        assert_eq!(cursor.last(), Some(11));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let chain = Arc::new(FakeChain::new());
        chain.set_height(1);

        let handler: Arc<dyn DeploymentHandler> = Arc::new(RecordingHandler::default());
        let cancel = CancellationToken::new();
        let poller = ChainPoller::new(chain, &watch());

        let task = tokio::spawn(poller.run(handler, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
