//! # minisuper-sync: Sync Manager for Minisuper POS
//!
//! Reconciles the Local Store with the server of record: the sync queue
//! goes up, server deltas come down, the checkpoint only moves forward.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Manager Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         Scheduler                                │  │
//! │  │  periodic timer · reconnect edge · external triggers             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        SyncManager                               │  │
//! │  │  Idle → Uploading → Downloading → Idle   (→ Error → Idle)        │  │
//! │  └──────┬──────────────────┬───────────────────────┬────────────────┘  │
//! │         ▼                  ▼                       ▼                    │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────────────────┐    │
//! │  │ batch        │  │ SyncApi        │  │ minisuper-db             │    │
//! │  │ collapse per │  │ HttpSyncApi    │  │ SyncStore (acks, merge)  │    │
//! │  │ entity       │  │ (reqwest, JWT) │  │ sync_queue / sync_log    │    │
//! │  └──────────────┘  └────────────────┘  └──────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS (SyncEventEmitter):                                     │
//! │  • status   - state, counts, online flag                               │
//! │  • progress - items handled per phase                                  │
//! │  • error    - phase failures, with retryable flag                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`manager`] - `SyncManager`, the cycle state machine
//! - [`scheduler`] - Background trigger loop
//! - [`api`] - Server boundary trait and HTTP client
//! - [`batch`] - Queue collapse and result matching
//! - [`retry`] - Backoff and dead-letter policy
//! - [`connectivity`] - Online probes
//! - [`status`] - Status, events, reports
//! - [`config`] - TOML + env configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use minisuper_sync::{Scheduler, SchedulerOptions, SyncConfig, SyncManager, SyncTrigger};
//!
//! let config = SyncConfig::load(None)?;
//! let manager = Arc::new(SyncManager::from_config(database, &config)?);
//!
//! // One-off cycle
//! let report = manager.sync(SyncTrigger::Manual).await?;
//!
//! // Or keep syncing in the background
//! let scheduler = Scheduler::spawn(manager.clone(), SchedulerOptions::from(&config.sync));
//! scheduler.trigger(SyncTrigger::Manual)?;
//! scheduler.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod api;
pub mod batch;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod manager;
pub mod retry;
pub mod scheduler;
pub mod status;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{HttpSyncApi, SyncApi};
pub use config::{RetrySettings, ServerSettings, StoreSettings, SyncConfig, SyncMode, SyncSettings};
pub use connectivity::{ConnectivityProbe, HttpProbe, ManualProbe};
pub use error::{SyncError, SyncResult};
pub use manager::{SyncManager, SyncManagerBuilder};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions};
pub use status::{
    BroadcastEmitter, DownloadReport, NoOpEmitter, SyncEvent, SyncEventEmitter, SyncReport,
    SyncState, SyncStatus, SyncTrigger, UploadReport,
};
