//! # Fetch Strategies
//!
//! ```text
//!   cache-first                       network-first
//!   ───────────                       ─────────────
//!   any cache hit? ──yes──► hit       fetch ──ok──► store if cacheable ─► resp
//!        │no                            │network error
//!        ▼                              ▼
//!   fetch ──► store if cacheable      any cache hit? ──yes──► hit
//!        │                              │no
//!        ▼                              ▼
//!   response / error                  fallback (503 JSON | "/" | offline page)
//! ```

use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::fetcher::Fetcher;
use crate::policy::{Fallback, RoutePolicy, Strategy};
use crate::request::{CacheRequest, FetchResponse, ResponseSource};
use crate::store::CacheStorage;

pub(crate) async fn respond(
    storage: &CacheStorage,
    fetcher: &dyn Fetcher,
    policy: &RoutePolicy,
    request: &CacheRequest,
    origin: &Url,
) -> CacheResult<FetchResponse> {
    match policy.strategy {
        Strategy::CacheFirst => cache_first(storage, fetcher, policy, request).await,
        Strategy::NetworkFirst => network_first(storage, fetcher, policy, request, origin).await,
    }
}

async fn cache_first(
    storage: &CacheStorage,
    fetcher: &dyn Fetcher,
    policy: &RoutePolicy,
    request: &CacheRequest,
) -> CacheResult<FetchResponse> {
    if let Some(hit) = storage.lookup(request) {
        return Ok(hit);
    }
    let response = fetcher.fetch(request).await?;
    store_if_cacheable(storage, policy, request, &response);
    Ok(response)
}

async fn network_first(
    storage: &CacheStorage,
    fetcher: &dyn Fetcher,
    policy: &RoutePolicy,
    request: &CacheRequest,
    origin: &Url,
) -> CacheResult<FetchResponse> {
    match fetcher.fetch(request).await {
        Ok(response) => {
            store_if_cacheable(storage, policy, request, &response);
            Ok(response)
        }
        Err(err) if err.is_network() => {
            debug!(url = %request.url, error = %err, "Network failed, trying cache");
            if let Some(hit) = storage.lookup(request) {
                return Ok(hit);
            }
            fallback(storage, policy.fallback, origin, err)
        }
        Err(err) => Err(err),
    }
}

fn store_if_cacheable(
    storage: &CacheStorage,
    policy: &RoutePolicy,
    request: &CacheRequest,
    response: &FetchResponse,
) {
    if policy.cacheable.allows(response) {
        storage
            .open(policy.cache_name, policy.expiration)
            .put(request, response);
    }
}

fn fallback(
    storage: &CacheStorage,
    fallback: Fallback,
    origin: &Url,
    err: CacheError,
) -> CacheResult<FetchResponse> {
    match fallback {
        Fallback::None => Err(err),
        Fallback::OfflineJson => Ok(offline_api_response()),
        Fallback::OfflinePage => {
            let root = origin.join("/")?;
            Ok(storage
                .lookup_key(root.as_str())
                .unwrap_or_else(offline_page))
        }
    }
}

/// `503` answer for an API read with no network and nothing cached.
pub fn offline_api_response() -> FetchResponse {
    let body = json!({
        "success": false,
        "error": "Offline - no cached data available",
        "offline": true,
    });
    FetchResponse {
        source: ResponseSource::Offline,
        ..FetchResponse::new(503, body.to_string()).with_content_type("application/json")
    }
}

/// Built-in page shown for a navigation with no network and no cached shell.
pub fn offline_page() -> FetchResponse {
    FetchResponse {
        source: ResponseSource::Offline,
        ..FetchResponse::new(200, OFFLINE_HTML).with_content_type("text/html")
    }
}

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="es">
  <head>
    <meta charset="utf-8">
    <title>Offline - Minisupermercado</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
      body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
             display: flex; align-items: center; justify-content: center;
             min-height: 100vh; margin: 0; background: #f7fafc; color: #2d3748; }
      .container { text-align: center; max-width: 400px; padding: 2rem; }
      .title { font-size: 1.5rem; font-weight: bold; margin-bottom: 0.5rem; }
      .message { color: #718096; margin-bottom: 2rem; }
      .button { background: #4299e1; color: white; padding: 0.75rem 1.5rem; border: none;
                border-radius: 0.375rem; cursor: pointer; font-size: 1rem; }
      .button:hover { background: #3182ce; }
    </style>
  </head>
  <body>
    <div class="container">
      <h1 class="title">Estás trabajando offline</h1>
      <p class="message">
        No hay conexión a internet. Puedes seguir usando la aplicación
        y los datos se sincronizarán cuando vuelva la conexión.
      </p>
      <button class="button" onclick="window.location.reload()">Intentar de nuevo</button>
    </div>
  </body>
</html>
"#;
