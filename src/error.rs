//! Error types for the deployment sniper

use thiserror::Error;

use crate::position::PositionState;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the deployment sniper
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    // RPC errors
    #[error("RPC query failed: {0}")]
    RpcQuery(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    // Swap errors
    #[error("Swap quote failed: {0}")]
    SwapQuote(String),

    #[error("Swap submission failed: {0}")]
    SwapSubmission(String),

    #[error("Swap confirmation failed: {0}")]
    SwapConfirmation(String),

    #[error("Router approval failed: {0}")]
    Approval(String),

    // Position monitoring errors
    #[error("Token query failed: {0}")]
    TokenQuery(String),

    #[error("Price query failed: {0}")]
    PriceQuery(String),

    #[error("Invalid position transition: {from:?} -> {to:?}")]
    InvalidTransition { from: PositionState, to: PositionState },

    // Notification errors
    #[error("Notification failed: {0}")]
    Notification(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RpcQuery(_)
                | Error::RpcTimeout(_)
                | Error::RpcConnection(_)
                | Error::TokenQuery(_)
                | Error::PriceQuery(_)
        )
    }

    /// Check if this error came out of the swap path
    pub fn is_swap_failure(&self) -> bool {
        matches!(
            self,
            Error::SwapQuote(_)
                | Error::SwapSubmission(_)
                | Error::SwapConfirmation(_)
                | Error::Approval(_)
        )
    }
}

// Conversion from ethers provider errors
impl From<ethers::providers::ProviderError> for Error {
    fn from(e: ethers::providers::ProviderError) -> Self {
        Error::RpcQuery(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RpcQuery("boom".into()).is_retryable());
        assert!(Error::RpcTimeout(500).is_retryable());
        assert!(Error::PriceQuery("no pool".into()).is_retryable());
        assert!(!Error::SwapSubmission("nonce too low".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_swap_failure_classification() {
        assert!(Error::SwapConfirmation("reverted".into()).is_swap_failure());
        assert!(Error::Approval("denied".into()).is_swap_failure());
        assert!(!Error::Notification("503".into()).is_swap_failure());
    }
}
