//! # Sync Status & Events
//!
//! ```text
//!            trigger                upload ok             download ok
//!   ┌──────┐ ───────► ┌───────────┐ ────────► ┌─────────────┐ ───────► ┌──────┐
//!   │ Idle │          │ Uploading │           │ Downloading │          │ Idle │
//!   └──────┘          └─────┬─────┘           └──────┬──────┘          └──────┘
//!                           │ phase error            │ phase error        ▲
//!                           ▼                        ▼                    │
//!                       ┌───────────────────────────────┐   emitted,      │
//!                       │             Error             │ ────────────────┘
//!                       └───────────────────────────────┘   last_error kept
//! ```
//!
//! UI integrations implement [`SyncEventEmitter`]; the CLI daemon uses
//! [`BroadcastEmitter`].

use chrono::{DateTime, Utc};
use minisuper_core::SyncPhase;
use serde::Serialize;
use tokio::sync::broadcast;

// =============================================================================
// Sync State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Uploading,
    Downloading,
    Error,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Uploading => write!(f, "uploading"),
            SyncState::Downloading => write!(f, "downloading"),
            SyncState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot for status queries and UI events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_syncing: bool,
    pub is_online: bool,
    pub pending_count: i64,
    pub conflict_count: i64,
    pub dead_letter_count: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// A scheduler is driving periodic cycles.
    pub has_periodic_sync: bool,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

pub trait SyncEventEmitter: Send + Sync {
    fn emit_status(&self, status: &SyncStatus);

    /// `processed` of `total` items handled in `phase`.
    fn emit_progress(&self, phase: SyncPhase, processed: usize, total: usize);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _phase: SyncPhase, _processed: usize, _total: usize) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Status(SyncStatus),
    Progress {
        phase: SyncPhase,
        processed: usize,
        total: usize,
    },
    Error {
        message: String,
        retryable: bool,
    },
}

/// Fans events out on a broadcast channel. Lagging receivers lose events.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<SyncEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastEmitter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl SyncEventEmitter for BroadcastEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        self.send(SyncEvent::Status(status.clone()));
    }

    fn emit_progress(&self, phase: SyncPhase, processed: usize, total: usize) {
        self.send(SyncEvent::Progress {
            phase,
            processed,
            total,
        });
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        self.send(SyncEvent::Error {
            message: message.to_string(),
            retryable,
        });
    }
}

// =============================================================================
// Cycle Reports
// =============================================================================

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Reconnect,
    Periodic,
    /// Relayed `background-sync` signal from the cache worker.
    BackgroundSync,
    /// Relayed periodic `sync-data` signal from the cache worker.
    PeriodicSync,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTrigger::Manual => write!(f, "manual"),
            SyncTrigger::Reconnect => write!(f, "reconnect"),
            SyncTrigger::Periodic => write!(f, "periodic"),
            SyncTrigger::BackgroundSync => write!(f, "background_sync"),
            SyncTrigger::PeriodicSync => write!(f, "periodic_sync"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub batches: usize,
    pub uploaded: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub products_inserted: usize,
    pub products_updated: usize,
    pub sales_inserted: usize,
    pub skipped: usize,
    /// Checkpoint after the phase.
    pub checkpoint: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub cycle_id: String,
    pub trigger: SyncTrigger,
    pub upload: UploadReport,
    pub download: DownloadReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
