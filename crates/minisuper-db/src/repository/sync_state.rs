//! # Sync State Repository
//!
//! Persisted scalars: the download checkpoint, the last successful sync and
//! this register's identity.

use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Lower bound for the next download (`lastSyncTimestamp`).
pub const LAST_SYNC_TIMESTAMP: &str = "last_sync_timestamp";

/// When a full cycle last succeeded.
pub const LAST_SUCCESSFUL_SYNC_AT: &str = "last_successful_sync_at";

/// Identifies this register to the server on every upload.
pub const REGISTER_ID: &str = "register_id";

/// Key/value repository for sync state.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        get(&self.pool, key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        set(&self.pool, key, value).await
    }

    /// The download checkpoint, `None` before the first full download.
    pub async fn checkpoint(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get_timestamp(LAST_SYNC_TIMESTAMP).await
    }

    /// Advances the checkpoint. Never moves it backwards.
    pub async fn advance_checkpoint(&self, timestamp: DateTime<Utc>) -> DbResult<DateTime<Utc>> {
        let current = self.checkpoint().await?;
        let next = match current {
            Some(existing) if existing > timestamp => existing,
            _ => timestamp,
        };
        set(&self.pool, LAST_SYNC_TIMESTAMP, &next.to_rfc3339()).await?;
        Ok(next)
    }

    pub async fn last_successful_sync(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get_timestamp(LAST_SUCCESSFUL_SYNC_AT).await
    }

    pub async fn record_successful_sync(&self, at: DateTime<Utc>) -> DbResult<()> {
        set(&self.pool, LAST_SUCCESSFUL_SYNC_AT, &at.to_rfc3339()).await
    }

    /// This store's register id, assigned on first use.
    pub async fn register_id(&self) -> DbResult<String> {
        if let Some(id) = self.get(REGISTER_ID).await? {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3) ON CONFLICT(key) DO NOTHING",
        )
        .bind(REGISTER_ID)
        .bind(&id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        // A concurrent caller may have won the insert.
        Ok(self.get(REGISTER_ID).await?.unwrap_or(id))
    }

    async fn get_timestamp(&self, key: &str) -> DbResult<Option<DateTime<Utc>>> {
        match self.get(key).await? {
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(|e| DbError::Corrupt(format!("bad timestamp in {}: {}", key, e))),
            None => Ok(None),
        }
    }
}

async fn get<'e, E: SqliteExecutor<'e>>(executor: E, key: &str) -> DbResult<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
        .bind(key)
        .fetch_optional(executor)
        .await?;
    Ok(value)
}

async fn set<'e, E: SqliteExecutor<'e>>(executor: E, key: &str, value: &str) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}
