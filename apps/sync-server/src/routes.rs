//! HTTP routes for the sync API.
//!
//! ```text
//!   POST /api/sync/upload     UploadRequest   → UploadResponse
//!   GET  /api/sync/download   DownloadQuery   → DownloadResponse
//!   GET  /api/health                          → HealthResponse
//! ```
//!
//! Body and query rejections are reported as 400 with the protocol error
//! body rather than axum's plain-text defaults.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use minisuper_core::protocol::{DownloadQuery, DownloadResponse, UploadRequest, UploadResponse};

use crate::auth::AuthUser;
use crate::error::{ServerError, ServerResult};
use crate::services::health_service;
use crate::AppState;

pub const API_PREFIX: &str = "/api";

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_bytes;

    let api = Router::new()
        .route("/sync/upload", post(upload))
        .route("/sync/download", get(download))
        .route("/health", get(health_service::health));

    Router::new()
        .nest(API_PREFIX, api)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> ServerResult<Json<UploadResponse>> {
    let Json(request) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    Ok(Json(state.sync.upload(&claims, &request).await))
}

async fn download(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> ServerResult<Json<DownloadResponse>> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    state.sync.download(&claims, &query).await.map(Json)
}
