//! `minisuper daemon`
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  daemon                                                          │
//! │                                                                  │
//! │  Scheduler (mode = auto) ◄── trigger_sender ◄── signal bridge    │
//! │       │                                              ▲           │
//! │       ▼                                              │           │
//! │  SyncManager ──► server            CacheWorker.subscribe()       │
//! │                                          ▲                       │
//! │                        stdin events ─────┤                       │
//! │                        periodic tick ────┘                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Runs until Ctrl+C, then stops the scheduler after its in-flight
//! cycle.

use std::sync::Arc;
use std::time::Duration;

use minisuper_cache::signals::PERIODIC_SYNC_TAG;
use minisuper_cache::{CacheWorker, DEFAULT_FETCH_TIMEOUT};
use minisuper_sync::{Scheduler, SchedulerHandle, SchedulerOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bridge::{spawn_signal_bridge, WorkerEvent};
use crate::cli::DaemonArgs;
use crate::context::AppContext;
use crate::error::CliResult;

pub async fn run(ctx: &AppContext, args: DaemonArgs) -> CliResult<()> {
    let mode = ctx.config.mode();
    let scheduler = if mode.runs_scheduler() {
        let manager = Arc::new(ctx.manager()?);
        Some(Scheduler::spawn(manager, SchedulerOptions::from(&ctx.config.sync)))
    } else {
        info!(%mode, "Scheduler not started");
        None
    };

    let worker = if args.no_cache {
        None
    } else {
        Some(start_worker(&args.app_origin).await?)
    };

    let bridge = match (&worker, &scheduler) {
        (Some(worker), Some(scheduler)) => Some(spawn_signal_bridge(
            worker.subscribe(),
            scheduler.trigger_sender(),
        )),
        _ => None,
    };

    event_loop(worker.as_ref(), &args).await;

    shutdown(scheduler, worker, bridge).await;
    Ok(())
}

async fn start_worker(origin: &str) -> CliResult<Arc<CacheWorker>> {
    let worker = Arc::new(CacheWorker::with_http(origin, DEFAULT_FETCH_TIMEOUT)?);
    match worker.install().await {
        Ok(()) => info!(origin, state = %worker.state(), "Cache worker installed"),
        // The app may not be up yet; sync keeps working without the shell.
        Err(e) => warn!(origin, error = %e, "Cache worker install failed"),
    }
    Ok(worker)
}

async fn event_loop(worker: Option<&Arc<CacheWorker>>, args: &DaemonArgs) {
    let mut lines = args
        .stdin_events
        .then(|| BufReader::new(tokio::io::stdin()).lines());
    let mut ticker = (args.periodic_sync_secs > 0)
        .then(|| tokio::time::interval(Duration::from_secs(args.periodic_sync_secs)));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
            line = next_line(&mut lines) => match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => handle_line(worker, &line).await,
                None => {
                    info!("stdin closed, no more worker events");
                    lines = None;
                }
            },
            _ = tick(&mut ticker) => {
                if let Some(worker) = worker {
                    worker.handle_periodic_sync(PERIODIC_SYNC_TAG);
                }
            }
        }
    }
    info!("Shutdown signal received");
}

async fn handle_line(worker: Option<&Arc<CacheWorker>>, line: &str) {
    let Some(worker) = worker else {
        warn!("Cache worker disabled, ignoring event");
        return;
    };
    let outcome = match WorkerEvent::parse(line) {
        Ok(event) => event.dispatch(worker).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(outcome) => println!("{}", outcome),
        Err(e) => warn!(error = %e, line, "Worker event failed"),
    }
}

/// Next stdin line; pends forever once stdin is gone or unused.
async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
) -> Option<String> {
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };
    match reader.next_line().await {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Failed to read stdin");
            None
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn shutdown(
    scheduler: Option<SchedulerHandle>,
    worker: Option<Arc<CacheWorker>>,
    bridge: Option<JoinHandle<()>>,
) {
    // Dropping the worker closes its signal channel, which ends the bridge.
    drop(worker);
    if let Some(bridge) = bridge {
        let _ = bridge.await;
    }
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    info!("Daemon stopped");
}
