//! Network access for the worker.
//!
//! Strategies only see [`Fetcher`]; [`HttpFetcher`] is the reqwest
//! implementation, tests plug in their own.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{CacheError, CacheResult};
use crate::request::{CacheRequest, FetchResponse};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the request. Any HTTP status is a response; only transport
    /// failures are errors.
    async fn fetch(&self, request: &CacheRequest) -> CacheResult<FetchResponse>;
}

/// [`Fetcher`] over reqwest with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Network(e.to_string()))?;
        Ok(HttpFetcher { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, err: reqwest::Error) -> CacheError {
        if err.is_timeout() {
            CacheError::Timeout(self.timeout.as_millis() as u64)
        } else {
            CacheError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: &CacheRequest) -> CacheResult<FetchResponse> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        debug!(status, bytes = body.len(), "Fetched");

        Ok(FetchResponse {
            content_type,
            ..FetchResponse::new(status, body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_returns_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/products"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"[{"code":"BEB001"}]"#, "application/json"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(DEFAULT_FETCH_TIMEOUT).unwrap();
        let ok = fetcher
            .fetch(&CacheRequest::get(&format!("{}/api/products", server.uri())).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.content_type.as_deref(), Some("application/json"));
        assert!(ok.text().contains("BEB001"));

        let missing = fetcher
            .fetch(&CacheRequest::get(&format!("{}/nope", server.uri())).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_millis(50)).unwrap();
        let err = fetcher
            .fetch(&CacheRequest::get(&server.uri()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let fetcher = HttpFetcher::new(DEFAULT_FETCH_TIMEOUT).unwrap();
        let err = fetcher
            .fetch(&CacheRequest::get("http://127.0.0.1:9/").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
