//! # Sync Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │ Transient       │  │ Fatal                   │ │
//! │  │                 │  │ (retried)       │  │ (cycle aborted)         │ │
//! │  │  InvalidConfig  │  │ Network         │  │ MissingCredentials      │ │
//! │  │  InvalidUrl     │  │ Timeout         │  │ Unauthorized            │ │
//! │  │  ConfigLoad/Save│  │ Offline         │  │ Rejected                │ │
//! │  │                 │  │ ServerUnavailable│ │ Protocol                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │  Cycle          │  │ Local Store                                 │  │
//! │  │  AlreadyInProg. │  │ Database                                    │  │
//! │  │  DownloadIncompl│  │                                             │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are not errors here: they are per-item outcomes recorded in
//! the queue and the sync log.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transient Network Errors
    // =========================================================================
    /// Connection refused, reset, DNS failure.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The connectivity probe reports no network.
    #[error("Device is offline")]
    Offline,

    /// 5xx, 408 or 429 from the server.
    #[error("Server unavailable ({status}): {message}")]
    ServerUnavailable { status: u16, message: String },

    // =========================================================================
    // Fatal Sync Errors
    // =========================================================================
    #[error("No auth token configured")]
    MissingCredentials,

    /// 401/403 from the server.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Any other 4xx, or `success: false`.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not match the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Cycle Errors
    // =========================================================================
    #[error("sync already in progress")]
    AlreadyInProgress,

    /// Some downloaded records could not be merged; checkpoint kept.
    #[error("Download incomplete: {failed} of {total} records failed to merge")]
    DownloadIncomplete { failed: usize, total: usize },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] minisuper_db::DbError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// True for failures worth retrying later (TransientNetworkError).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::Offline
                | SyncError::ServerUnavailable { .. }
        )
    }

    /// True for failures that abort the cycle and need an operator
    /// (FatalSyncError).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::MissingCredentials
                | SyncError::Unauthorized(_)
                | SyncError::Rejected { .. }
                | SyncError::Protocol(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Network("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::ServerUnavailable {
            status: 503,
            message: "down".into()
        }
        .is_retryable());

        assert!(!SyncError::MissingCredentials.is_retryable());
        assert!(!SyncError::AlreadyInProgress.is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SyncError::MissingCredentials.is_fatal());
        assert!(SyncError::Unauthorized("expired".into()).is_fatal());
        assert!(SyncError::Protocol("bad json".into()).is_fatal());
        assert!(!SyncError::Timeout(5).is_fatal());
    }

    #[test]
    fn test_already_in_progress_message() {
        assert_eq!(
            SyncError::AlreadyInProgress.to_string(),
            "sync already in progress"
        );
    }
}
