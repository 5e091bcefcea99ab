//! # minisuper-db: Local Store for Minisuper POS
//!
//! Embedded SQLite storage (sqlx) for the catalog, sales, cash sessions and
//! the sync queue.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Minisuper POS Data Flow                            │
//! │                                                                         │
//! │  pos-cli (sell BEB001 x3)              Sync Manager                     │
//! │       │                                     │                           │
//! │       ▼                                     ▼                           │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   minisuper-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────┐  │   │
//! │  │  │ MutationRecorder │  │    SyncStore     │  │ Repositories │  │   │
//! │  │  │ entity + queue   │  │ acks, conflicts, │  │ (reads)      │  │   │
//! │  │  │ in one tx        │  │ download merge   │  │              │  │   │
//! │  │  └────────┬─────────┘  └────────┬─────────┘  └──────┬───────┘  │   │
//! │  │           └──── write_lock ─────┘                   │          │   │
//! │  │                      │                              │          │   │
//! │  │                      ▼                              ▼          │   │
//! │  │           ┌─────────────────────────────────────────────┐      │   │
//! │  │           │        Database (SqlitePool, WAL)           │      │   │
//! │  │           └─────────────────────────────────────────────┘      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, configuration, mutation lock
//! - [`migrations`] - Embedded schema migrations
//! - [`error`] - Database error types
//! - [`repository`] - Per-table reads and row operations
//! - [`recorder`] - Local mutations with their sync intents
//! - [`sync_store`] - Server outcomes merged back
//!
//! ## Usage
//!
//! ```rust,ignore
//! use minisuper_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("minisuper.db")).await?;
//!
//! let product = db.recorder().create_product(new_product).await?;
//! let sale = db.recorder().create_sale(new_sale).await?;
//!
//! let pending = db.sync_queue().pending(50, chrono::Utc::now()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod recorder;
pub mod repository;
pub mod sync_store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, StoreLocation};
pub use recorder::MutationRecorder;
pub use sync_store::{MergeOutcome, SyncStore};

// Repository re-exports for convenience
pub use repository::cash_session::CashSessionRepository;
pub use repository::product::ProductRepository;
pub use repository::sale::SaleRepository;
pub use repository::sync_log::{NewLogEntry, SyncLogRepository, DEFAULT_LOG_RETENTION_DAYS};
pub use repository::sync_queue::SyncQueueRepository;
pub use repository::sync_state::SyncStateRepository;
