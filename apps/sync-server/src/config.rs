//! Sync server configuration.
//!
//! Layered with the `config` crate, later layers win:
//!
//! ```text
//!   built-in defaults
//!        │
//!        ▼
//!   server.toml (optional, or the path given on the command line)
//!        │
//!        ▼
//!   MINISUPER_SERVER_* environment variables
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{ServerError, ServerResult};

/// Sync server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,

    /// SQLite database file (`:memory:` for a throwaway store)
    pub database_path: PathBuf,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Lifetime of issued tokens in seconds
    pub jwt_lifetime_secs: i64,

    /// Request body limit in bytes (default: 16MB)
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_path: PathBuf::from("minisuper-server.db"),
            max_connections: 5,
            jwt_secret: "minisuper-dev-secret-change-in-production".to_string(),
            jwt_lifetime_secs: 86_400,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Loads defaults, then the config file, then the environment.
    ///
    /// Without an explicit `path`, `server.toml` in the working directory is
    /// read when present.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let defaults = ServerConfig::default();

        let file = match path {
            Some(path) => File::from(path.to_path_buf()).required(true),
            None => File::with_name("server").required(false),
        };

        let config: ServerConfig = Config::builder()
            .set_default("bind_addr", defaults.bind_addr)?
            .set_default(
                "database_path",
                defaults.database_path.to_string_lossy().into_owned(),
            )?
            .set_default("max_connections", defaults.max_connections as i64)?
            .set_default("jwt_secret", defaults.jwt_secret)?
            .set_default("jwt_lifetime_secs", defaults.jwt_lifetime_secs)?
            .set_default("max_body_bytes", defaults.max_body_bytes as i64)?
            .add_source(file)
            .add_source(Environment::with_prefix("MINISUPER_SERVER").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration for tests: in-memory store, fixed secret.
    pub fn in_memory(jwt_secret: &str) -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            jwt_secret: jwt_secret.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ServerResult<()> {
        self.socket_addr()?;
        if self.jwt_secret.trim().is_empty() {
            return Err(ServerError::InvalidConfig(
                "jwt_secret must not be empty".to_string(),
            ));
        }
        if self.jwt_lifetime_secs <= 0 {
            return Err(ServerError::InvalidConfig(
                "jwt_lifetime_secs must be positive".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> ServerResult<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|_| ServerError::InvalidConfig(format!("invalid bind_addr '{}'", self.bind_addr)))
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(":memory:")
    }
}
