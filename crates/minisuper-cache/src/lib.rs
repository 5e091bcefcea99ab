//! # minisuper-cache: Network Cache Worker for Minisuper POS
//!
//! Keeps the point of sale usable without a network: the app shell is
//! precached on install, reads are served per route policy, and
//! connectivity events are rebroadcast to clients as sync signals.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Cache Worker Architecture                          │
//! │                                                                         │
//! │   client request                                                        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────┐  classify   ┌──────────────┐  strategy  ┌──────────┐ │
//! │  │ CacheWorker  │────────────►│ PolicyTable  │───────────►│ Fetcher  │ │
//! │  │ handle_fetch │             │ api / static │            │ (reqwest)│ │
//! │  └──────┬───────┘             │ nav / generic│            └──────────┘ │
//! │         │                     └──────┬───────┘                          │
//! │         │                            ▼                                  │
//! │         │                     ┌──────────────┐                          │
//! │         │                     │ CacheStorage │ named LRU + max age      │
//! │         │                     └──────────────┘                          │
//! │         │                                                               │
//! │         │ sync / periodicsync / push                                    │
//! │         ▼                                                               │
//! │   broadcast::Sender<ClientSignal> ──► every subscribed client           │
//! │   (BACKGROUND_SYNC, PERIODIC_SYNC, NOTIFICATION, OPEN_WINDOW)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`worker`] - `CacheWorker`, lifecycle and event handlers
//! - [`policy`] - Route classes, strategies, cache names
//! - [`store`] - Named LRU/TTL stores
//! - [`fetcher`] - Network boundary
//! - [`request`] - Request/response types
//! - [`signals`] - Client signals and worker messages
//! - [`error`] - Cache error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use minisuper_cache::{CacheRequest, CacheWorker, ClientSignal};
//!
//! let worker = CacheWorker::with_http("http://localhost:3000", DEFAULT_FETCH_TIMEOUT)?;
//! worker.install().await?;
//!
//! let mut signals = worker.subscribe();
//! worker.handle_sync("background-sync");
//! assert!(signals.recv().await?.requests_sync());
//!
//! let page = worker.handle_fetch(&CacheRequest::navigate("http://localhost:3000/dashboard")?).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fetcher;
pub mod policy;
pub mod request;
pub mod signals;
pub mod store;
pub mod worker;

mod strategy;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{CacheError, CacheResult};
pub use fetcher::{Fetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
pub use policy::{Cacheable, Fallback, PolicyTable, RouteClass, RoutePolicy, Strategy};
pub use request::{CacheRequest, FetchResponse, Method, RequestMode, ResponseSource};
pub use signals::{ClientSignal, Notification, WorkerMessage};
pub use store::{CacheStorage, CacheStore, Expiration};
pub use strategy::{offline_api_response, offline_page};
pub use worker::{CacheWorker, WorkerState};
