//! Stream module - block ingestion and deployment detection
//!
//! The poller walks new heights, the detector picks out contract creations
//! by the watched deployer, and each hit is pushed to a [`DeploymentHandler`].

pub mod detector;
pub mod poller;

use async_trait::async_trait;

pub use detector::{Deployment, DeploymentDetector};
pub use poller::{ChainPoller, ScanCursor};

/// Receives deployments in the order they were found on chain.
///
/// The poller awaits each call before moving on, so a handler that buys
/// synchronously completes the buy before the next block is scanned.
#[async_trait]
pub trait DeploymentHandler: Send + Sync {
    async fn on_deployment(&self, deployment: Deployment);
}
