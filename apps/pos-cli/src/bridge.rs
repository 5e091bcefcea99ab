//! # Cache Worker ⇄ Scheduler Bridge
//!
//! ```text
//!   CacheWorker ──broadcast<ClientSignal>──► bridge ──mpsc<SyncTrigger>──► Scheduler
//!
//!   BACKGROUND_SYNC  → SyncTrigger::BackgroundSync
//!   PERIODIC_SYNC    → SyncTrigger::PeriodicSync
//!   anything else    → logged, not forwarded
//! ```
//!
//! The worker never sees the Scheduler; the Scheduler never sees the
//! worker. Only this task knows both.
//!
//! Without a browser runtime, worker events arrive as text lines
//! ([`WorkerEvent::parse`]), e.g. from the daemon's stdin.

use minisuper_cache::{CacheRequest, CacheWorker, ClientSignal};
use minisuper_sync::SyncTrigger;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CliError, CliResult};

/// Sync trigger a client signal stands for, if any.
pub fn trigger_for(signal: &ClientSignal) -> Option<SyncTrigger> {
    match signal {
        ClientSignal::BackgroundSync { .. } => Some(SyncTrigger::BackgroundSync),
        ClientSignal::PeriodicSync { .. } => Some(SyncTrigger::PeriodicSync),
        ClientSignal::Notification(_) | ClientSignal::OpenWindow { .. } => None,
    }
}

/// Forwards sync signals until either side closes.
pub fn spawn_signal_bridge(
    mut signals: broadcast::Receiver<ClientSignal>,
    triggers: mpsc::Sender<SyncTrigger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = match signals.recv().await {
                Ok(signal) => signal,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Signal bridge lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(trigger) = trigger_for(&signal) else {
                debug!(?signal, "Client signal not sync related");
                continue;
            };
            if triggers.send(trigger).await.is_err() {
                debug!("Scheduler gone, stopping signal bridge");
                break;
            }
            debug!(trigger = %trigger, "Relayed cache worker signal");
        }
        info!("Signal bridge stopped");
    })
}

// =============================================================================
// Worker Events
// =============================================================================

/// One runtime event for the cache worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// `sync <tag>`
    Sync(String),
    /// `periodicsync <tag>`
    PeriodicSync(String),
    /// `message {"type":"..."}`
    Message(String),
    /// `push [text]`
    Push(Option<String>),
    /// `click [action]`
    Click(Option<String>),
    /// `fetch <url>` / `navigate <url>`
    Fetch { url: String, navigate: bool },
}

impl WorkerEvent {
    pub fn parse(line: &str) -> CliResult<Self> {
        let line = line.trim();
        let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let arg = || Some(rest.to_string()).filter(|s| !s.is_empty());
        let required = |what: &str| {
            arg().ok_or_else(|| CliError::InvalidArgument(format!("'{}' needs a {}", name, what)))
        };

        match name {
            "sync" => Ok(WorkerEvent::Sync(required("tag")?)),
            "periodicsync" => Ok(WorkerEvent::PeriodicSync(required("tag")?)),
            "message" => Ok(WorkerEvent::Message(required("JSON body")?)),
            "push" => Ok(WorkerEvent::Push(arg())),
            "click" => Ok(WorkerEvent::Click(arg())),
            "fetch" => Ok(WorkerEvent::Fetch {
                url: required("URL")?,
                navigate: false,
            }),
            "navigate" => Ok(WorkerEvent::Fetch {
                url: required("URL")?,
                navigate: true,
            }),
            other => Err(CliError::InvalidArgument(format!(
                "unknown worker event '{}'",
                other
            ))),
        }
    }

    /// Delivers the event and describes the outcome.
    pub async fn dispatch(self, worker: &CacheWorker) -> CliResult<String> {
        match self {
            WorkerEvent::Sync(tag) => Ok(format!("sync {}: handled={}", tag, worker.handle_sync(&tag))),
            WorkerEvent::PeriodicSync(tag) => Ok(format!(
                "periodicsync {}: handled={}",
                tag,
                worker.handle_periodic_sync(&tag)
            )),
            WorkerEvent::Message(raw) => {
                worker.handle_raw_message(&raw)?;
                Ok(format!("message handled, worker {}", worker.state()))
            }
            WorkerEvent::Push(text) => {
                let notification = worker.handle_push(text.as_deref());
                Ok(format!("notification: {}", notification.body))
            }
            WorkerEvent::Click(action) => Ok(match worker.handle_notification_click(action.as_deref()) {
                Some(url) => format!("open window {}", url),
                None => "notification dismissed".to_string(),
            }),
            WorkerEvent::Fetch { url, navigate } => {
                let request = if navigate {
                    CacheRequest::navigate(&url)?
                } else {
                    CacheRequest::get(&url)?
                };
                Ok(match worker.handle_fetch(&request).await? {
                    Some(response) => format!(
                        "{} {} ({:?}, {} bytes)",
                        response.status,
                        url,
                        response.source,
                        response.body.len()
                    ),
                    None => format!("{} not intercepted", url),
                })
            }
        }
    }
}
