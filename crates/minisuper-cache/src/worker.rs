//! # Cache Worker
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Parsed ──install()──► Installing ──precache ok──► Installed           │
//! │                              │                          │ skip-waiting  │
//! │                              │ precache failed          ▼               │
//! │                              └──────► Redundant     Activating          │
//! │                                                         │ drop caches   │
//! │                                                         │ not allowed   │
//! │                                                         ▼               │
//! │                                                     Activated           │
//! │                                            (intercepts fetch from here) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Events
//! - fetch: [`CacheWorker::handle_fetch`], routed by the [`PolicyTable`]
//! - message: `SKIP_WAITING`, `CLEAR_CACHE`
//! - sync / periodicsync: rebroadcast as [`ClientSignal`]s
//! - push / notificationclick: notification and open-window signals
//!
//! The worker does not know about the Sync Manager. Whoever subscribes to
//! the signals decides what a `BACKGROUND_SYNC` means.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::policy::{PolicyTable, ALLOWED_CACHES, PRECACHE_NAME, PRECACHE_ROUTES};
use crate::request::{CacheRequest, FetchResponse};
use crate::signals::{
    ClientSignal, Notification, WorkerMessage, ACTION_CLOSE, ACTION_EXPLORE, BACKGROUND_SYNC_TAG,
    PERIODIC_SYNC_TAG,
};
use crate::store::{CacheStorage, Expiration};
use crate::strategy;

const SIGNAL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

pub struct CacheWorker {
    origin: Url,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    policies: PolicyTable,
    state: RwLock<WorkerState>,
    signals: broadcast::Sender<ClientSignal>,
}

impl CacheWorker {
    pub fn new(origin: Url, fetcher: Arc<dyn Fetcher>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        CacheWorker {
            origin,
            storage: CacheStorage::new(),
            fetcher,
            policies: PolicyTable::default(),
            state: RwLock::new(WorkerState::Parsed),
            signals,
        }
    }

    /// Worker for `origin` fetching over HTTP.
    pub fn with_http(origin: &str, timeout: Duration) -> CacheResult<Self> {
        let fetcher = HttpFetcher::new(timeout)?;
        Ok(CacheWorker::new(Url::parse(origin)?, Arc::new(fetcher)))
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// New client; receives every signal broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientSignal> {
        self.signals.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.signals.receiver_count()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Precaches the shell and activates immediately. Precaching is
    /// all-or-nothing: one failed route stores nothing and the worker
    /// becomes redundant.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub async fn install(&self) -> CacheResult<()> {
        let state = self.state();
        if state != WorkerState::Parsed {
            return Err(CacheError::InvalidState(state));
        }
        self.set_state(WorkerState::Installing);
        info!(routes = PRECACHE_ROUTES.len(), "Installing cache worker");

        let mut fetched = Vec::with_capacity(PRECACHE_ROUTES.len());
        for route in PRECACHE_ROUTES {
            match self.precache_one(route).await {
                Ok(entry) => fetched.push(entry),
                Err(err) => {
                    warn!(route, error = %err, "Precache failed, install aborted");
                    self.set_state(WorkerState::Redundant);
                    return Err(err);
                }
            }
        }

        let precache = self.storage.open(PRECACHE_NAME, Expiration::unbounded());
        for (request, response) in &fetched {
            precache.put(request, response);
        }
        self.set_state(WorkerState::Installed);
        debug!(cached = fetched.len(), "Static assets cached");

        self.skip_waiting()
    }

    async fn precache_one(&self, route: &str) -> CacheResult<(CacheRequest, FetchResponse)> {
        let request = CacheRequest::get(self.origin.join(route)?.as_str())?;
        let failed = |reason: String| CacheError::PrecacheFailed {
            url: route.to_string(),
            reason,
        };
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.is_success() {
            return Err(failed(format!("HTTP {}", response.status)));
        }
        Ok((request, response))
    }

    /// Activates an installed worker; a no-op in any other state.
    pub fn skip_waiting(&self) -> CacheResult<()> {
        if self.state() == WorkerState::Installed {
            self.activate()?;
        }
        Ok(())
    }

    /// Deletes every cache generation outside the allow-list.
    pub fn activate(&self) -> CacheResult<()> {
        let state = self.state();
        if state != WorkerState::Installed {
            return Err(CacheError::InvalidState(state));
        }
        self.set_state(WorkerState::Activating);

        for name in self.storage.names() {
            if !ALLOWED_CACHES.contains(&name.as_str()) {
                info!(cache = %name, "Deleting old cache");
                self.storage.delete(&name);
            }
        }

        self.set_state(WorkerState::Activated);
        info!("Cache worker activated");
        Ok(())
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Answers an intercepted request. `None` when the worker does not
    /// handle it (not active yet, non-GET, non-http); the caller then goes
    /// to the network itself.
    pub async fn handle_fetch(&self, request: &CacheRequest) -> CacheResult<Option<FetchResponse>> {
        if self.state() != WorkerState::Activated {
            return Ok(None);
        }
        let Some(policy) = self.policies.classify(request) else {
            return Ok(None);
        };
        debug!(url = %request.url, class = ?policy.class, "Intercepted");
        strategy::respond(
            &self.storage,
            self.fetcher.as_ref(),
            policy,
            request,
            &self.origin,
        )
        .await
        .map(Some)
    }

    // =========================================================================
    // Messages & Events
    // =========================================================================

    pub fn handle_message(&self, message: WorkerMessage) -> CacheResult<()> {
        debug!(?message, "Worker message");
        match message {
            WorkerMessage::SkipWaiting => self.skip_waiting(),
            WorkerMessage::ClearCache => {
                let cleared = self.storage.clear();
                info!(cleared, "All caches deleted");
                Ok(())
            }
        }
    }

    /// Parses and handles a raw client message.
    pub fn handle_raw_message(&self, raw: &str) -> CacheResult<()> {
        self.handle_message(WorkerMessage::parse(raw)?)
    }

    /// `sync` event. Returns whether the tag was recognized.
    pub fn handle_sync(&self, tag: &str) -> bool {
        if tag != BACKGROUND_SYNC_TAG {
            debug!(tag, "Ignoring sync tag");
            return false;
        }
        self.broadcast(ClientSignal::background_sync());
        true
    }

    /// `periodicsync` event. Returns whether the tag was recognized.
    pub fn handle_periodic_sync(&self, tag: &str) -> bool {
        if tag != PERIODIC_SYNC_TAG {
            debug!(tag, "Ignoring periodic sync tag");
            return false;
        }
        self.broadcast(ClientSignal::periodic_sync());
        true
    }

    pub fn handle_push(&self, payload: Option<&str>) -> Notification {
        let notification = Notification::from_push(payload, Utc::now());
        self.broadcast(ClientSignal::Notification(notification.clone()));
        notification
    }

    /// Returns the URL opened, if any.
    pub fn handle_notification_click(&self, action: Option<&str>) -> Option<String> {
        let url = match action {
            Some(ACTION_CLOSE) => return None,
            Some(ACTION_EXPLORE) => "/dashboard",
            _ => "/",
        };
        self.broadcast(ClientSignal::OpenWindow {
            url: url.to_string(),
        });
        Some(url.to_string())
    }

    fn broadcast(&self, signal: ClientSignal) -> usize {
        match self.signals.send(signal) {
            Ok(clients) => {
                debug!(clients, "Signal broadcast");
                clients
            }
            Err(broadcast::error::SendError(signal)) => {
                debug!(?signal, "No clients listening, signal dropped");
                0
            }
        }
    }
}
