//! # Database Pool Management
//!
//! Connection pool creation and the single-writer mutation lock.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Local Store Handle                                 │
//! │                                                                         │
//! │  DbConfig::new(path) ──► Database::new(config).await                   │
//! │                              │                                          │
//! │              ┌───────────────┴────────────────┐                         │
//! │              ▼                                ▼                         │
//! │  ┌────────────────────────┐      ┌────────────────────────────┐        │
//! │  │      SqlitePool        │      │  write_lock: Mutex<()>     │        │
//! │  │  readers run freely    │      │  one local writer at a time│        │
//! │  └────────────────────────┘      └────────────────────────────┘        │
//! │              │                                │                         │
//! │   products() / sales() / ...       recorder() / sync_store()           │
//! │   (reads)                          (writes: entity + queue, or         │
//! │                                     server results merged back)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Database` is cheap to clone; clones share the pool and the lock.

use minisuper_core::TaxRate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::recorder::MutationRecorder;
use crate::repository::cash_session::CashSessionRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::sync_log::SyncLogRepository;
use crate::repository::sync_queue::SyncQueueRepository;
use crate::repository::sync_state::SyncStateRepository;
use crate::sync_store::SyncStore;

// =============================================================================
// Configuration
// =============================================================================

/// Where the Local Store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Private to one connection; gone when the pool closes.
    Memory,
}

/// How to open the Local Store.
///
/// ```rust,ignore
/// let config = DbConfig::new(dirs.data_dir().join("minisuper.db"))
///     .tax_rate(TaxRate::from_bps(1200));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: StoreLocation,

    /// Upper bound on pooled connections (readers share them; writers also
    /// queue on the mutation lock).
    pub pool_size: u32,

    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,

    /// Apply pending migrations while opening.
    pub migrate: bool,

    /// Tax applied to new sales. 1200 bps (12% IVA) unless configured.
    pub tax_rate: TaxRate,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: StoreLocation::File(path.into()),
            pool_size: 4,
            acquire_timeout: Duration::from_secs(15),
            migrate: true,
            tax_rate: TaxRate::default(),
        }
    }

    /// Throwaway store for tests. An in-memory SQLite database belongs to a
    /// single connection, so the pool holds exactly one.
    pub fn in_memory() -> Self {
        DbConfig {
            location: StoreLocation::Memory,
            pool_size: 1,
            acquire_timeout: Duration::from_secs(5),
            migrate: true,
            tax_rate: TaxRate::default(),
        }
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Open without touching the schema.
    pub fn skip_migrations(mut self) -> Self {
        self.migrate = false;
        self
    }

    pub fn tax_rate(mut self, rate: TaxRate) -> Self {
        self.tax_rate = rate;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            StoreLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            StoreLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::Unavailable(e.to_string()))?,
        };
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true))
    }

    /// Memory stores must keep their only connection alive.
    fn idle_timeout(&self) -> Option<Duration> {
        match self.location {
            StoreLocation::File(_) => Some(Duration::from_secs(300)),
            StoreLocation::Memory => None,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to an open Local Store.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    tax_rate: TaxRate,
}

impl Database {
    /// Opens (creating if needed) the store and brings its schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        debug!(location = ?config.location, pool_size = config.pool_size, "Opening Local Store");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout())
            .max_lifetime(None)
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::Unavailable(e.to_string()))?;

        if config.migrate {
            migrations::run_migrations(&pool).await?;
        }

        info!(
            location = ?config.location,
            tax_rate_bps = config.tax_rate.bps(),
            "Local Store open"
        );

        Ok(Database {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            tax_rate: config.tax_rate,
        })
    }

    /// Raw pool, for diagnostics and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(self.pool.clone())
    }

    pub fn cash_sessions(&self) -> CashSessionRepository {
        CashSessionRepository::new(self.pool.clone())
    }

    pub fn sync_queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.pool.clone())
    }

    pub fn sync_log(&self) -> SyncLogRepository {
        SyncLogRepository::new(self.pool.clone())
    }

    pub fn sync_state(&self) -> SyncStateRepository {
        SyncStateRepository::new(self.pool.clone())
    }

    /// Returns the Mutation Recorder: every local write goes through it.
    pub fn recorder(&self) -> MutationRecorder {
        MutationRecorder::new(self.pool.clone(), self.write_lock.clone(), self.tax_rate)
    }

    /// Returns the write side used by the Sync Manager.
    pub fn sync_store(&self) -> SyncStore {
        SyncStore::new(self.pool.clone(), self.write_lock.clone())
    }

    /// Closes the pool; later calls on any clone fail.
    pub async fn close(&self) {
        debug!("Closing Local Store");
        self.pool.close().await;
    }

    /// True while the store answers queries.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
