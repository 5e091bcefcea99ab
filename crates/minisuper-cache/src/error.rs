//! # Cache Worker Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Cache Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Request        │  │ Network         │  │ Lifecycle               │ │
//! │  │                 │  │ (fallbacks run) │  │                         │ │
//! │  │  InvalidUrl     │  │ Network         │  │ PrecacheFailed          │ │
//! │  │  InvalidMessage │  │ Timeout         │  │ InvalidState            │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A non-2xx response is not an error: it is a response the strategy
//! decides not to store.

use thiserror::Error;

use crate::worker::WorkerState;

/// Result type alias for cache worker operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid worker message: {0}")]
    InvalidMessage(String),

    /// Connection refused, reset, DNS failure.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Fetch timed out after {0} ms")]
    Timeout(u64),

    /// Install aborted; nothing was stored.
    #[error("Precache of {url} failed: {reason}")]
    PrecacheFailed { url: String, reason: String },

    #[error("Operation not allowed while worker is {0}")]
    InvalidState(WorkerState),
}

impl CacheError {
    /// True when the failure came from the network, so a cached copy or an
    /// offline fallback may stand in.
    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::Network(_) | CacheError::Timeout(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::InvalidMessage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(CacheError::Network("refused".into()).is_network());
        assert!(CacheError::Timeout(5000).is_network());
        assert!(!CacheError::InvalidMessage("bad".into()).is_network());
        assert!(!CacheError::PrecacheFailed {
            url: "/".into(),
            reason: "404".into()
        }
        .is_network());
    }
}
