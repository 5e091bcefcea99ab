//! # Named Cache Stores
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CacheStorage                                    │
//! │                                                                         │
//! │   "minisupermercado-pwa-v1"  ─► CacheStore (unbounded, precache)       │
//! │   "runtime-cache-v1"         ─► CacheStore (unbounded)                 │
//! │   "offline-cache"            ─► CacheStore (200 entries, 30 days)      │
//! │   "api-cache"                ─► CacheStore (100 entries, 24 hours)     │
//! │                                                                         │
//! │   CacheStore = Mutex<LruCache<url, Entry{response, stored_at}>>         │
//! │     put    → insert as most recent, evict least recent over capacity   │
//! │     lookup → expired? purge and miss : promote and hit                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ages are measured with `tokio::time::Instant`, so paused-clock tests can
//! move past `max_age` without sleeping.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::request::{CacheRequest, FetchResponse};

/// Size and age limits for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expiration {
    pub max_entries: Option<NonZeroUsize>,
    pub max_age: Option<Duration>,
}

impl Expiration {
    pub const fn unbounded() -> Self {
        Expiration {
            max_entries: None,
            max_age: None,
        }
    }

    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Expiration {
            max_entries: NonZeroUsize::new(max_entries),
            max_age: Some(max_age),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    response: FetchResponse,
    stored_at: Instant,
}

/// One named cache.
#[derive(Debug)]
pub struct CacheStore {
    name: String,
    expiration: Expiration,
    entries: Mutex<LruCache<String, Entry>>,
}

impl CacheStore {
    fn new(name: &str, expiration: Expiration) -> Self {
        let entries = match expiration.max_entries {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        CacheStore {
            name: name.to_string(),
            expiration,
            entries: Mutex::new(entries),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    pub fn put(&self, request: &CacheRequest, response: &FetchResponse) {
        self.put_key(request.cache_key(), response.clone());
    }

    pub(crate) fn put_key(&self, key: String, response: FetchResponse) {
        let mut entries = self.entries.lock();
        let evicted = entries.push(
            key.clone(),
            Entry {
                response,
                stored_at: Instant::now(),
            },
        );
        if let Some((old_key, _)) = evicted.filter(|(old_key, _)| *old_key != key) {
            debug!(cache = %self.name, url = %old_key, "Evicted least recently used entry");
        }
    }

    /// Returns a fresh copy of the cached response, purging it when expired.
    pub fn lookup(&self, request: &CacheRequest) -> Option<FetchResponse> {
        self.lookup_key(&request.cache_key())
    }

    pub(crate) fn lookup_key(&self, key: &str) -> Option<FetchResponse> {
        let mut entries = self.entries.lock();
        let expired = self.is_expired(entries.peek(key)?);
        if expired {
            entries.pop(key);
            debug!(cache = %self.name, url = %key, "Purged expired entry");
            return None;
        }
        entries
            .get(key)
            .map(|entry| entry.response.clone().served_from(&self.name))
    }

    pub fn delete(&self, request: &CacheRequest) -> bool {
        self.entries.lock().pop(&request.cache_key()).is_some()
    }

    /// Cached URLs, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.expiration
            .max_age
            .is_some_and(|max_age| entry.stored_at.elapsed() >= max_age)
    }
}

/// Every cache the worker has opened, in creation order.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<Vec<Arc<CacheStore>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        CacheStorage::default()
    }

    /// Opens `name`, creating it with `expiration` if it does not exist yet.
    /// An existing store keeps the limits it was created with.
    pub fn open(&self, name: &str, expiration: Expiration) -> Arc<CacheStore> {
        if let Some(store) = self.get(name) {
            return store;
        }
        let mut caches = self.caches.write();
        if let Some(store) = caches.iter().find(|store| store.name == name) {
            return store.clone();
        }
        debug!(cache = %name, "Opening cache");
        let store = Arc::new(CacheStore::new(name, expiration));
        caches.push(store.clone());
        store
    }

    pub fn get(&self, name: &str) -> Option<Arc<CacheStore>> {
        self.caches
            .read()
            .iter()
            .find(|store| store.name == name)
            .cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn delete(&self, name: &str) -> bool {
        let mut caches = self.caches.write();
        let before = caches.len();
        caches.retain(|store| store.name != name);
        caches.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.caches
            .read()
            .iter()
            .map(|store| store.name.clone())
            .collect()
    }

    /// First live match across all caches, oldest cache first.
    pub fn lookup(&self, request: &CacheRequest) -> Option<FetchResponse> {
        self.lookup_key(&request.cache_key())
    }

    pub(crate) fn lookup_key(&self, key: &str) -> Option<FetchResponse> {
        let caches: Vec<Arc<CacheStore>> = self.caches.read().clone();
        caches.iter().find_map(|store| store.lookup_key(key))
    }

    /// Deletes every cache; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut caches = self.caches.write();
        let count = caches.len();
        caches.clear();
        count
    }
}
