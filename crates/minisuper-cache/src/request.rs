//! Requests the worker intercepts and the responses it hands back.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use url::Url;

use crate::error::CacheResult;

pub use reqwest::Method;

/// How the client issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    #[default]
    Other,
}

/// An outbound request as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
}

impl CacheRequest {
    pub fn new(method: Method, url: Url) -> Self {
        CacheRequest {
            method,
            url,
            mode: RequestMode::Other,
        }
    }

    /// GET for a subresource.
    pub fn get(url: &str) -> CacheResult<Self> {
        Ok(CacheRequest::new(Method::GET, Url::parse(url)?))
    }

    /// GET for a page navigation.
    pub fn navigate(url: &str) -> CacheResult<Self> {
        Ok(CacheRequest {
            mode: RequestMode::Navigate,
            ..CacheRequest::get(url)?
        })
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Stores are keyed by the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Served from the named cache.
    Cache(String),
    /// Built by the worker because neither network nor cache could answer.
    Offline,
}

/// A response body with the metadata the strategies look at.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status; `0` for an opaque response.
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        FetchResponse {
            status,
            content_type: None,
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_opaque(&self) -> bool {
        self.status == 0
    }

    pub fn is_offline(&self) -> bool {
        self.source == ResponseSource::Offline
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> CacheResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub(crate) fn served_from(mut self, cache_name: &str) -> Self {
        self.source = ResponseSource::Cache(cache_name.to_string());
        self
    }
}
