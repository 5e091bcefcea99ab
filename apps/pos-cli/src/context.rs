//! # Command Context
//!
//! What every command needs: resolved configuration and an open Local
//! Store.
//!
//! ## Resolution Order (later overrides earlier)
//! ```text
//!   SyncConfig defaults
//!     └─► sync.toml (--config or platform config dir)
//!           └─► MINISUPER_* environment
//!                 └─► --database / --user flags
//! ```

use minisuper_core::TaxRate;
use minisuper_db::{Database, DbConfig};
use minisuper_sync::{SyncConfig, SyncManager};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::error::{CliError, CliResult};

pub struct AppContext {
    pub config: SyncConfig,
    pub db: Database,
    json: bool,
}

impl AppContext {
    pub async fn open(cli: &Cli) -> CliResult<Self> {
        let mut config = SyncConfig::load(cli.config.clone())?;
        if let Some(path) = &cli.database {
            config.store.database_path = Some(path.clone());
        }
        if let Some(user) = &cli.user {
            config.store.user_id = user.clone();
        }
        config.validate()?;

        let path = config.database_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!(?path, "Opening Local Store");

        let db_config =
            DbConfig::new(path.clone()).tax_rate(TaxRate::from_bps(config.store.tax_rate_bps));
        let db = Database::new(db_config).await?;
        info!(?path, user = %config.store.user_id, "Local Store ready");

        Ok(AppContext::from_parts(config, db, cli.json))
    }

    pub fn from_parts(config: SyncConfig, db: Database, json: bool) -> Self {
        AppContext { config, db, json }
    }

    pub fn user_id(&self) -> &str {
        &self.config.store.user_id
    }

    /// Sync Manager over HTTP, refusing when sync is turned off.
    pub fn manager(&self) -> CliResult<SyncManager> {
        if !self.config.mode().is_sync_enabled() {
            return Err(CliError::InvalidArgument(
                "sync is disabled (mode = offline)".to_string(),
            ));
        }
        Ok(SyncManager::from_config(self.db.clone(), &self.config)?)
    }

    /// Prints `value` as JSON with `--json`, otherwise through `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> CliResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}
