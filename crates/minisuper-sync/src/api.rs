//! # Server Boundary
//!
//! The Sync Manager talks to the server of record only through [`SyncApi`].
//!
//! ```text
//! ┌──────────────┐  POST {base}/sync/upload    ┌──────────────────────────┐
//! │ SyncManager  │ ──────────────────────────► │                          │
//! │              │  GET  {base}/sync/download  │   Server of record       │
//! │  SyncApi     │ ──────────────────────────► │   (Authorization: Bearer)│
//! └──────────────┘                             └──────────────────────────┘
//!
//!   Status mapping
//!   ──────────────
//!   2xx + success:true  → Ok
//!   401 / 403           → Unauthorized        (fatal)
//!   408 / 429 / 5xx     → ServerUnavailable   (transient)
//!   other 4xx           → Rejected            (fatal)
//!   connect failure     → Network             (transient)
//!   timeout             → Timeout             (transient)
//!   undecodable body    → Protocol            (fatal)
//! ```

use async_trait::async_trait;
use minisuper_core::protocol::{
    DownloadQuery, DownloadResponse, ErrorBody, UploadRequest, UploadResponse,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::ServerSettings;
use crate::error::{SyncError, SyncResult};

/// The server of record, as the Sync Manager sees it.
#[async_trait]
pub trait SyncApi: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse>;

    async fn download(&self, query: &DownloadQuery) -> SyncResult<DownloadResponse>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// [`SyncApi`] over HTTP/JSON with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpSyncApi {
    pub fn new(settings: &ServerSettings) -> SyncResult<Self> {
        let timeout = settings.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpSyncApi {
            client,
            base_url: settings.base_url()?,
            auth_token: settings.auth_token.clone().filter(|t| !t.is_empty()),
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn token(&self) -> SyncResult<&str> {
        self.auth_token
            .as_deref()
            .ok_or(SyncError::MissingCredentials)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        let response = request.send().await.map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Protocol(format!("Failed to parse response: {}", e)))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_secs())
        } else if err.is_decode() {
            SyncError::Protocol(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl SyncApi for HttpSyncApi {
    #[instrument(skip(self, request), fields(items = request.len()))]
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        let token = self.token()?;
        let url = self.endpoint("sync/upload")?;
        debug!(url = %url, "POST upload");

        let response: UploadResponse = self
            .send(self.client.post(url).bearer_auth(token).json(request))
            .await?;

        if !response.success {
            warn!("Server answered upload with success=false");
            return Err(SyncError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: "upload reported success=false".into(),
            });
        }
        Ok(response)
    }

    #[instrument(skip(self, query))]
    async fn download(&self, query: &DownloadQuery) -> SyncResult<DownloadResponse> {
        let token = self.token()?;
        let url = self.endpoint("sync/download")?;
        debug!(url = %url, since = ?query.last_sync_timestamp, "GET download");

        let response: DownloadResponse = self
            .send(self.client.get(url).bearer_auth(token).query(query))
            .await?;

        if !response.success {
            return Err(SyncError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: "download reported success=false".into(),
            });
        }
        Ok(response)
    }
}

/// Maps a non-2xx response to an error, preferring the server's `error` text.
fn map_status_error(status: StatusCode, body: &str) -> SyncError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body.chars().take(200).collect()
            }
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::ServerUnavailable {
                status: status.as_u16(),
                message,
            }
        }
        s if s.is_server_error() => SyncError::ServerUnavailable {
            status: s.as_u16(),
            message,
        },
        s => SyncError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use minisuper_core::protocol::{DownloadData, DownloadStatistics, UploadResults};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str, token: Option<&str>) -> ServerSettings {
        ServerSettings {
            base_url: base_url.to_string(),
            auth_token: token.map(str::to_string),
            request_timeout_secs: 2,
        }
    }

    fn empty_upload_response() -> UploadResponse {
        UploadResponse {
            success: true,
            results: UploadResults::default(),
            sync_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upload_sends_bearer_token_under_base_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/upload"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_upload_response()))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpSyncApi::new(&settings(&format!("{}/api", server.uri()), Some("secret")))
            .unwrap();
        let response = api.upload(&UploadRequest::default()).await.unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let api = HttpSyncApi::new(&settings(&server.uri(), None)).unwrap();
        let err = api.upload(&UploadRequest::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingCredentials));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/download"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"success": false, "error": "Token expired"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sync/upload"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let api = HttpSyncApi::new(&settings(&server.uri(), Some("t"))).unwrap();

        match api.download(&DownloadQuery::default()).await.unwrap_err() {
            SyncError::Unauthorized(message) => assert_eq!(message, "Token expired"),
            other => panic!("expected Unauthorized, got {:?}", other),
        }

        let err = api.upload(&UploadRequest::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::ServerUnavailable { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"success": false, "error": "Invalid body"})),
            )
            .mount(&server)
            .await;

        let api = HttpSyncApi::new(&settings(&server.uri(), Some("t"))).unwrap();
        let err = api.upload(&UploadRequest::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let api = HttpSyncApi::new(&settings(&server.uri(), Some("t"))).unwrap();
        let err = api.download(&DownloadQuery::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_download_passes_query_flags() {
        let server = MockServer::start().await;
        let now = Utc::now();
        let body = DownloadResponse {
            success: true,
            data: DownloadData {
                products: vec![],
                sales: vec![],
                sync_timestamp: now,
            },
            statistics: DownloadStatistics {
                products_count: 0,
                sales_count: 0,
                last_sync_timestamp: None,
                new_sync_timestamp: now,
            },
        };
        Mock::given(method("GET"))
            .and(path("/sync/download"))
            .and(query_param("includeOwnSalesOnly", "true"))
            .and(query_param("includeProducts", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpSyncApi::new(&settings(&server.uri(), Some("t"))).unwrap();
        let query = DownloadQuery {
            include_own_sales_only: true,
            ..Default::default()
        };
        let response = api.download(&query).await.unwrap();
        assert_eq!(response.data.sync_timestamp, now);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let api =
            HttpSyncApi::new(&settings(&format!("http://127.0.0.1:{}", port), Some("t"))).unwrap();
        let err = api.upload(&UploadRequest::default()).await.unwrap_err();
        assert!(err.is_retryable(), "got {:?}", err);
    }
}
