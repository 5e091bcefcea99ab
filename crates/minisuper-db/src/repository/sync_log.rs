//! # Sync Log Repository
//!
//! Durable audit trail of every sync outcome (success, error, conflict).

use chrono::{DateTime, Duration, Utc};
use minisuper_core::{EntityType, SyncLogEntry, SyncOutcome, SyncPhase};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;

/// Default retention for `cleanup_older_than`.
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;

/// Repository for the sync log.
#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

/// A log record about to be written.
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub cycle_id: &'a str,
    pub phase: SyncPhase,
    pub entity_type: Option<EntityType>,
    pub entity_local_id: Option<&'a str>,
    pub outcome: SyncOutcome,
    pub message: String,
}

impl SyncLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Appends one record.
    pub async fn append(&self, entry: NewLogEntry<'_>) -> DbResult<SyncLogEntry> {
        let record = SyncLogEntry {
            id: Uuid::new_v4().to_string(),
            cycle_id: entry.cycle_id.to_string(),
            phase: entry.phase,
            entity_type: entry.entity_type,
            entity_local_id: entry.entity_local_id.map(str::to_string),
            outcome: entry.outcome,
            message: entry.message,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO sync_log (
                id, cycle_id, phase, entity_type, entity_local_id,
                outcome, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&record.id)
        .bind(&record.cycle_id)
        .bind(record.phase)
        .bind(record.entity_type)
        .bind(&record.entity_local_id)
        .bind(record.outcome)
        .bind(&record.message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            cycle_id = %record.cycle_id,
            phase = %record.phase,
            outcome = %record.outcome,
            "Sync log appended"
        );
        Ok(record)
    }

    /// Most recent records first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SyncLogEntry>> {
        let entries = sqlx::query_as::<_, SyncLogEntry>(
            "SELECT * FROM sync_log ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Records of one sync cycle, in write order.
    pub async fn for_cycle(&self, cycle_id: &str) -> DbResult<Vec<SyncLogEntry>> {
        let entries = sqlx::query_as::<_, SyncLogEntry>(
            "SELECT * FROM sync_log WHERE cycle_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Deletes records older than `days`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, days: u32) -> DbResult<u64> {
        self.cleanup_before(Utc::now() - Duration::days(days as i64)).await
    }

    /// Deletes records created before `cutoff`.
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_log WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!(removed = result.rows_affected(), "Pruned sync log");
        }
        Ok(result.rows_affected())
    }
}
