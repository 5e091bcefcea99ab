//! In-memory [`Fetcher`] for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CacheError, CacheResult};
use crate::fetcher::Fetcher;
use crate::request::{CacheRequest, FetchResponse};

/// Answers by path; unknown paths get a 404.
#[derive(Debug, Default)]
pub(crate) struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, String)>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        ScriptedFetcher::default()
    }

    pub fn offline() -> Self {
        let fetcher = ScriptedFetcher::default();
        fetcher.go_offline();
        fetcher
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &CacheRequest) -> CacheResult<FetchResponse> {
        let path = request.path().to_string();
        *self.calls.lock().entry(path.clone()).or_default() += 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Network("connection refused".to_string()));
        }
        let (status, body) = self
            .routes
            .lock()
            .get(&path)
            .cloned()
            .unwrap_or((404, "Not Found".to_string()));
        Ok(FetchResponse::new(status, body))
    }
}
