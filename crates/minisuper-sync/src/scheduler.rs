//! # Sync Scheduler
//!
//! Background task deciding when cycles run.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Scheduler Loop                                 │
//! │                                                                         │
//! │   periodic tick (30s) ──────────────► Periodic                         │
//! │   probe tick: offline → online ─────► Reconnect                        │
//! │   handle.trigger(..) ───────────────► Manual / BackgroundSync / ...    │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                               spawn manager.sync(trigger)               │
//! │                               ├── AlreadyInProgress → dropped          │
//! │                               ├── Offline → skipped                    │
//! │                               └── done → prune sync log                │
//! │                                                                         │
//! │   handle.shutdown() ──► stop ticking, wait for the in-flight cycle     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::manager::SyncManager;
use crate::status::SyncTrigger;

/// Timing for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub probe_interval: Duration,
    pub log_retention_days: u32,
}

impl From<&SyncSettings> for SchedulerOptions {
    fn from(settings: &SyncSettings) -> Self {
        SchedulerOptions {
            interval: settings.interval(),
            probe_interval: settings.probe_interval(),
            log_retention_days: settings.log_retention_days,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<SyncTrigger>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a cycle. Dropped when the trigger queue is full.
    pub fn trigger(&self, trigger: SyncTrigger) -> SyncResult<()> {
        match self.trigger_tx.try_send(trigger) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(trigger = %trigger, "Trigger queue full, dropping");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::ShuttingDown),
        }
    }

    /// Sender for bridging external signals (e.g. the cache worker).
    pub fn trigger_sender(&self) -> mpsc::Sender<SyncTrigger> {
        self.trigger_tx.clone()
    }

    /// Stops the loop and waits for any in-flight cycle.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task panicked");
        }
    }
}

pub struct Scheduler;

impl Scheduler {
    pub fn spawn(manager: Arc<SyncManager>, options: SchedulerOptions) -> SchedulerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(run_loop(manager, options, trigger_rx, shutdown_rx));

        SchedulerHandle {
            trigger_tx,
            shutdown_tx,
            task,
        }
    }
}

async fn run_loop(
    manager: Arc<SyncManager>,
    options: SchedulerOptions,
    mut trigger_rx: mpsc::Receiver<SyncTrigger>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    info!(
        interval_secs = options.interval.as_secs(),
        "Sync scheduler started"
    );
    manager.set_periodic(true).await;

    let mut periodic = time::interval_at(Instant::now() + options.interval, options.interval);
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut probe = time::interval(options.probe_interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut was_online = manager.check_connectivity().await;
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,

            Some(trigger) = trigger_rx.recv() => {
                start_cycle(&mut cycles, &manager, trigger, options.log_retention_days);
            }

            _ = periodic.tick() => {
                start_cycle(&mut cycles, &manager, SyncTrigger::Periodic, options.log_retention_days);
            }

            _ = probe.tick() => {
                let online = manager.check_connectivity().await;
                if online && !was_online {
                    start_cycle(&mut cycles, &manager, SyncTrigger::Reconnect, options.log_retention_days);
                }
                was_online = online;
            }

            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Sync cycle task panicked");
                }
            }
        }
    }

    info!("Sync scheduler stopping");
    while let Some(joined) = cycles.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Sync cycle task panicked");
        }
    }
    manager.set_periodic(false).await;
}

fn start_cycle(
    cycles: &mut JoinSet<()>,
    manager: &Arc<SyncManager>,
    trigger: SyncTrigger,
    retention_days: u32,
) {
    if manager.is_syncing() {
        debug!(trigger = %trigger, "Cycle in flight, dropping trigger");
        return;
    }

    let manager = manager.clone();
    cycles.spawn(async move {
        match manager.sync(trigger).await {
            Ok(report) => debug!(
                trigger = %trigger,
                cycle_id = %report.cycle_id,
                uploaded = report.upload.uploaded,
                "Scheduled cycle finished"
            ),
            Err(SyncError::AlreadyInProgress) => {
                debug!(trigger = %trigger, "Cycle in flight, dropping trigger")
            }
            Err(SyncError::Offline) => debug!(trigger = %trigger, "Offline, cycle skipped"),
            Err(e) => warn!(trigger = %trigger, error = %e, "Scheduled cycle failed"),
        }

        match manager
            .database()
            .sync_log()
            .cleanup_older_than(retention_days)
            .await
        {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned sync log"),
            Err(e) => warn!(error = %e, "Sync log cleanup failed"),
        }
    });
}
