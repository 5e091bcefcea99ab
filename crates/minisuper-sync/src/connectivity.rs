//! # Connectivity
//!
//! Whether the server is reachable right now. The Sync Manager refuses to
//! start a cycle while offline, and the scheduler triggers a cycle on the
//! offline → online edge.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ServerSettings;
use crate::error::SyncResult;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

// =============================================================================
// Manual Probe
// =============================================================================

/// Online flag set from outside (tests, OS network events, the CLI).
///
/// Clones share the flag.
#[derive(Debug, Clone)]
pub struct ManualProbe {
    online: Arc<AtomicBool>,
}

impl ManualProbe {
    pub fn new(online: bool) -> Self {
        ManualProbe {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            debug!(online, "Connectivity changed");
        }
    }
}

#[async_trait]
impl ConnectivityProbe for ManualProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// =============================================================================
// HTTP Probe
// =============================================================================

/// Online when `GET {base}/health` answers with any 2xx.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    health_url: Url,
}

impl HttpProbe {
    const TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(settings: &ServerSettings) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| crate::SyncError::InvalidConfig(e.to_string()))?;
        let health_url = settings.base_url()?.join("health")?;
        Ok(HttpProbe { client, health_url })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.get(self.health_url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}
