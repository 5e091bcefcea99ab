//! # Repository Module
//!
//! One repository per table.
//!
//! ## Read / Write Split
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Repository methods (db.products().list(..))                           │
//! │  └── read through the pool, run concurrently with sync                 │
//! │                                                                         │
//! │  Row operations (product::insert, sync_queue::enqueue, ...)            │
//! │  └── crate-private, generic over the executor so the Mutation          │
//! │      Recorder and the Sync Store compose them into one transaction     │
//! │      under the mutation lock                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Catalog queries
//! - [`SaleRepository`](sale::SaleRepository) - Sales, stats, sale numbers
//! - [`CashSessionRepository`](cash_session::CashSessionRepository) - Register sessions
//! - [`SyncQueueRepository`](sync_queue::SyncQueueRepository) - Outbox
//! - [`SyncLogRepository`](sync_log::SyncLogRepository) - Audit log
//! - [`SyncStateRepository`](sync_state::SyncStateRepository) - Checkpoint

pub mod cash_session;
pub mod product;
pub mod sale;
pub mod sync_log;
pub mod sync_queue;
pub mod sync_state;
