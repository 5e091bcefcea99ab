//! # CLI Error Types
//!
//! Errors for command handlers. `main` prints them and exits with [`CliError::exit_code`].
//!
//! ```text
//!   DbError    ──► Store      (validation, stock, not found, ...)
//!   SyncError  ──► Sync       (config, network, auth)
//!   CacheError ──► Cache      (precache, fetch)
//!   bad flags  ──► InvalidArgument
//! ```

use minisuper_cache::CacheError;
use minisuper_db::DbError;
use minisuper_sync::SyncError;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] DbError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Output failed: {0}")]
    Output(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        CliError::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Process exit code: 2 for bad input, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument(_) | CliError::NotFound { .. } => 2,
            CliError::Store(DbError::Domain(_)) => 2,
            _ => 1,
        }
    }
}
