//! # Sync Configuration
//!
//! Client-side configuration for the Sync Manager and the Local Store it
//! drives.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MINISUPER_SERVER_URL=https://api.minisuper.example                 │
//! │     MINISUPER_AUTH_TOKEN=eyJhbGciOi...                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/minisuper-pos/sync.toml (Linux)                          │
//! │     ~/Library/Application Support/com.minisuper.pos/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     http://localhost:3000/api, 30s interval, 10 attempts               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [server]
//! base_url = "https://api.minisuper.example/api"
//! auth_token = "eyJhbGciOi..."
//! request_timeout_secs = 30
//!
//! [sync]
//! mode = "auto"          # auto | manual | offline
//! batch_size = 100
//! interval_secs = 30
//! include_own_sales_only = false
//!
//! [retry]
//! max_attempts = 10
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//!
//! [store]
//! database_path = "/var/lib/minisuper/minisuper.db"
//! user_id = "cajero-1"
//! tax_rate_bps = 1200
//! ```

use minisuper_core::DEFAULT_TAX_RATE_BPS;
use minisuper_db::DEFAULT_LOG_RETENTION_DAYS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// When sync cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Scheduler runs: periodic timer, reconnect and external triggers.
    #[default]
    Auto,

    /// Only explicit `sync` calls.
    Manual,

    /// Sync disabled; local operations only.
    Offline,
}

impl SyncMode {
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    pub fn runs_scheduler(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "manual" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// Where the server of record lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL; `sync/upload` and `sync/download` are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer JWT. Sync refuses to start without one.
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerSettings {
    /// Base URL with a trailing slash so relative joins keep the path.
    pub fn base_url(&self) -> SyncResult<Url> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SyncError::InvalidUrl(format!(
                "Server URL must be http:// or https://, got scheme '{}'",
                other
            ))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Cycle behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Upload items per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Periodic cycle interval (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// How often the scheduler polls the connectivity probe (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_true")]
    pub include_products: bool,

    #[serde(default = "default_true")]
    pub include_sales: bool,

    /// Download only the sales of the authenticated user.
    #[serde(default)]
    pub include_own_sales_only: bool,

    /// Sync log retention, pruned after every scheduled cycle.
    #[serde(default = "default_log_retention")]
    pub log_retention_days: u32,
}

fn default_batch_size() -> u32 {
    100
}

fn default_interval() -> u64 {
    30
}

fn default_probe_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_log_retention() -> u32 {
    DEFAULT_LOG_RETENTION_DAYS
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            batch_size: default_batch_size(),
            interval_secs: default_interval(),
            probe_interval_secs: default_probe_interval(),
            include_products: true,
            include_sales: true,
            include_own_sales_only: false,
            log_retention_days: default_log_retention(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Bounded exponential backoff for failed upload items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Failures before an entry is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// The Local Store this terminal writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite file. Defaults to the platform data dir.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Cashier recorded on sales and cash sessions.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default = "default_tax_rate")]
    pub tax_rate_bps: u32,
}

fn default_user_id() -> String {
    "local-user".to_string()
}

fn default_tax_rate() -> u32 {
    DEFAULT_TAX_RATE_BPS
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            database_path: None,
            user_id: default_user_id(),
            tax_rate_bps: default_tax_rate(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        self.server.base_url()?;

        if self.server.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval_secs must be greater than 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "retry multiplier must be at least 1.0".into(),
            ));
        }
        if self.store.user_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("user_id must not be empty".into()));
        }

        Ok(())
    }

    /// Applies `MINISUPER_*` overrides from a variable lookup.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MINISUPER_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        if let Some(token) = lookup("MINISUPER_AUTH_TOKEN") {
            self.server.auth_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Some(mode) = lookup("MINISUPER_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => self.sync.mode = parsed,
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(value) = lookup("MINISUPER_SYNC_INTERVAL_SECS") {
            match value.parse() {
                Ok(secs) => self.sync.interval_secs = secs,
                Err(_) => warn!(value = %value, "Invalid MINISUPER_SYNC_INTERVAL_SECS"),
            }
        }

        if let Some(value) = lookup("MINISUPER_BATCH_SIZE") {
            match value.parse() {
                Ok(size) => self.sync.batch_size = size,
                Err(_) => warn!(value = %value, "Invalid MINISUPER_BATCH_SIZE"),
            }
        }

        if let Some(path) = lookup("MINISUPER_DATABASE_PATH") {
            self.store.database_path = Some(PathBuf::from(path));
        }

        if let Some(user) = lookup("MINISUPER_USER_ID") {
            self.store.user_id = user;
        }

        if let Some(value) = lookup("MINISUPER_TAX_RATE_BPS") {
            match value.parse() {
                Ok(bps) => self.store.tax_rate_bps = bps,
                Err(_) => warn!(value = %value, "Invalid MINISUPER_TAX_RATE_BPS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "minisuper", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The configured database file, or `minisuper.db` in the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        self.store.database_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "minisuper", "pos")
                .map(|dirs| dirs.data_dir().join("minisuper.db"))
                .unwrap_or_else(|| PathBuf::from("minisuper.db"))
        })
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.server.auth_token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("MANUAL".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert_eq!("disabled".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("hub".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.store.tax_rate_bps, 1200);
        assert!(config.auth_token().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.server.base_url = "ws://localhost:3000".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.server.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.server.base_url = "https://api.example.com".to_string();
        config.sync.batch_size = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.sync.batch_size = 50;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry.max_attempts = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let settings = ServerSettings {
            base_url: "http://localhost:3000/api".to_string(),
            ..Default::default()
        };
        let base = settings.base_url().unwrap();
        assert_eq!(
            base.join("sync/upload").unwrap().as_str(),
            "http://localhost:3000/api/sync/upload"
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MINISUPER_SERVER_URL", "https://pos.example.com/api"),
            ("MINISUPER_AUTH_TOKEN", "token-123"),
            ("MINISUPER_SYNC_MODE", "manual"),
            ("MINISUPER_SYNC_INTERVAL_SECS", "not-a-number"),
            ("MINISUPER_BATCH_SIZE", "25"),
            ("MINISUPER_USER_ID", "cajero-2"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.base_url, "https://pos.example.com/api");
        assert_eq!(config.auth_token(), Some("token-123"));
        assert_eq!(config.mode(), SyncMode::Manual);
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.store.user_id, "cajero-2");
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            auth_token = "abc"

            [sync]
            batch_size = 20
            "#,
        )
        .unwrap();

        let loaded = SyncConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.sync.batch_size, 20);
        assert_eq!(loaded.auth_token(), Some("abc"));

        let missing = SyncConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(missing.sync.batch_size, SyncConfig::default().sync.batch_size);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [sync]
            batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.server.request_timeout_secs, 30);
    }
}
