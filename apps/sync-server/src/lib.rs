//! # Minisuper Sync Server
//!
//! REST server of record for Minisuper registers.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Server                                     │
//! │                                                                         │
//! │  Register ──► /api/sync/upload ──┐                                     │
//! │  (Bearer JWT)                    ├──► SyncService ──► SQLite           │
//! │  Register ◄── /api/sync/download ┘    per-item tx     products         │
//! │                                                       sales + items    │
//! │  Probe ─────► /api/health                             cash_sessions    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! `server.toml` and `MINISUPER_SERVER_*` environment variables:
//! - `BIND_ADDR` - listen address (default: 0.0.0.0:3000)
//! - `DATABASE_PATH` - SQLite file (default: minisuper-server.db)
//! - `JWT_SECRET` - HS256 signing secret
//! - `JWT_LIFETIME_SECS` - issued token lifetime (default: 86400)

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

// Re-exports
pub use auth::{Claims, JwtManager};
pub use config::ServerConfig;
pub use db::ServerDatabase;
pub use error::{ServerError, ServerResult};
pub use routes::{router, API_PREFIX};
pub use services::sync_service::SyncService;

/// Shared application state.
pub struct AppState {
    pub db: ServerDatabase,
    pub sync: SyncService,
    pub jwt: JwtManager,
    pub config: ServerConfig,
}

impl AppState {
    /// Opens the database (running migrations) and wires the services.
    pub async fn connect(config: ServerConfig) -> ServerResult<Arc<Self>> {
        config.validate()?;
        let db = ServerDatabase::connect(&config).await?;

        Ok(Arc::new(AppState {
            sync: SyncService::new(db.clone()),
            jwt: JwtManager::new(&config.jwt_secret, config.jwt_lifetime_secs),
            db,
            config,
        }))
    }

    /// Issues a bearer token for a cashier.
    pub fn issue_token(&self, user_id: &str, email: &str, role: &str) -> ServerResult<String> {
        self.jwt.issue(user_id, email, role)
    }
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    info!(%addr, "Sync server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    info!("Sync server stopped");
    Ok(())
}
