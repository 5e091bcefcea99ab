//! # Sync Queue Repository
//!
//! The outbox of sync intents.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., create_sale)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. INSERT INTO sales / sale_items, UPDATE products.stock      │   │
//! │  │  2. INSERT INTO sync_queue (entity_type, action, payload)      │   │
//! │  │     VALUES ('sale', 'CREATE', <full sale snapshot JSON>)       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SYNC MANAGER                                                          │
//! │  ├── applied   → entries removed, entity synced                        │
//! │  ├── failed    → attempts+1, next_attempt_at pushed back               │
//! │  │               (DEAD_LETTER after max attempts)                      │
//! │  └── conflict  → CONFLICT, waits for manual resolution                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An entity's entries are replayed oldest first, so an entity is only due
//! when none of its entries is in backoff, in conflict or dead-lettered.

use chrono::{DateTime, Utc};
use minisuper_core::{EntityType, QueueCounts, QueueStatus, SyncAction, SyncQueueEntry};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;

/// Repository for sync queue operations.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Entries ready for upload at `now`, oldest first.
    pub async fn pending(&self, limit: u32, now: DateTime<Utc>) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(
            r#"
            SELECT q.* FROM sync_queue q
            WHERE q.status = 'PENDING'
              AND NOT EXISTS (
                  SELECT 1 FROM sync_queue b
                  WHERE b.entity_type = q.entity_type
                    AND b.entity_local_id = q.entity_local_id
                    AND (b.status <> 'PENDING'
                         OR (b.next_attempt_at IS NOT NULL AND b.next_attempt_at > ?1))
              )
            ORDER BY q.created_at, q.rowid
            LIMIT ?2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = entries.len(), "Fetched pending sync entries");
        Ok(entries)
    }

    /// Pending entries still waiting out a retry delay at `now`, oldest first.
    pub async fn backing_off(&self, now: DateTime<Utc>) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(
            r#"
            SELECT * FROM sync_queue
            WHERE status = 'PENDING' AND next_attempt_at IS NOT NULL AND next_attempt_at > ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Gets one entry.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncQueueEntry>> {
        let entry = sqlx::query_as::<_, SyncQueueEntry>("SELECT * FROM sync_queue WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Every entry of one entity, oldest first.
    pub async fn for_entity(
        &self,
        entity_type: EntityType,
        entity_local_id: &str,
    ) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(
            r#"
            SELECT * FROM sync_queue
            WHERE entity_type = ?1 AND entity_local_id = ?2
            ORDER BY created_at, rowid
            "#,
        )
        .bind(entity_type)
        .bind(entity_local_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Entries waiting for manual conflict resolution.
    pub async fn conflicts(&self) -> DbResult<Vec<SyncQueueEntry>> {
        self.with_status(QueueStatus::Conflict).await
    }

    /// Entries that exhausted their retries.
    pub async fn dead_letters(&self) -> DbResult<Vec<SyncQueueEntry>> {
        self.with_status(QueueStatus::DeadLetter).await
    }

    async fn with_status(&self, status: QueueStatus) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(
            "SELECT * FROM sync_queue WHERE status = ?1 ORDER BY created_at, rowid",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Counts by status.
    pub async fn counts(&self) -> DbResult<QueueCounts> {
        let rows: Vec<(QueueStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status {
                QueueStatus::Pending => counts.pending = count,
                QueueStatus::Conflict => counts.conflicts = count,
                QueueStatus::DeadLetter => counts.dead_letters = count,
            }
        }
        Ok(counts)
    }

    /// Removes an acknowledged entry.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        remove(&self.pool, id).await
    }

    /// Records a failed attempt and when to retry.
    pub async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DbResult<()> {
        mark_failed(&self.pool, id, error, next_attempt_at).await
    }

    /// Parks an entry for manual resolution.
    pub async fn mark_conflict(
        &self,
        id: &str,
        reason: &str,
        server_data: Option<&str>,
    ) -> DbResult<()> {
        mark_conflict(&self.pool, id, reason, server_data).await
    }

    /// Gives up retrying an entry.
    pub async fn dead_letter(&self, id: &str, error: &str) -> DbResult<()> {
        dead_letter(&self.pool, id, error).await
    }

    /// Manual resolution: drops a conflicted entry. The entity stays unsynced.
    pub async fn discard_conflict(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1 AND status = 'CONFLICT'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Manual retry: moves every dead letter back to PENDING with a fresh budget.
    pub async fn requeue_dead_letters(&self) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'PENDING', attempts = 0, next_attempt_at = NULL
            WHERE status = 'DEAD_LETTER'
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Row Operations (composable into transactions)
// =============================================================================

/// Appends a sync intent carrying a full snapshot of the entity.
pub(crate) async fn enqueue<'e, E: SqliteExecutor<'e>>(
    executor: E,
    entity_type: EntityType,
    entity_local_id: &str,
    action: SyncAction,
    payload: String,
    now: DateTime<Utc>,
) -> DbResult<SyncQueueEntry> {
    let entry = SyncQueueEntry {
        id: Uuid::new_v4().to_string(),
        entity_type,
        entity_local_id: entity_local_id.to_string(),
        action,
        payload,
        created_at: now,
        attempts: 0,
        last_error: None,
        next_attempt_at: None,
        status: QueueStatus::Pending,
        conflict_reason: None,
        server_data: None,
    };

    sqlx::query(
        r#"
        INSERT INTO sync_queue (
            id, entity_type, entity_local_id, action, payload,
            created_at, attempts, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'PENDING')
        "#,
    )
    .bind(&entry.id)
    .bind(entry.entity_type)
    .bind(&entry.entity_local_id)
    .bind(entry.action)
    .bind(&entry.payload)
    .bind(entry.created_at)
    .execute(executor)
    .await?;

    debug!(
        entity_type = %entity_type,
        entity_local_id = %entity_local_id,
        action = %action,
        "Queued for sync"
    );
    Ok(entry)
}

pub(crate) async fn remove<'e, E: SqliteExecutor<'e>>(executor: E, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Entries still queued for an entity, in any status.
pub(crate) async fn remaining_for_entity<'e, E: SqliteExecutor<'e>>(
    executor: E,
    entity_type: EntityType,
    entity_local_id: &str,
) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sync_queue WHERE entity_type = ?1 AND entity_local_id = ?2",
    )
    .bind(entity_type)
    .bind(entity_local_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub(crate) async fn mark_failed<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sync_queue
        SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(error)
    .bind(next_attempt_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn mark_conflict<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    reason: &str,
    server_data: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sync_queue
        SET status = 'CONFLICT', conflict_reason = ?2, server_data = ?3
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(reason)
    .bind(server_data)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn dead_letter<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    error: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sync_queue
        SET status = 'DEAD_LETTER', attempts = attempts + 1, last_error = ?2,
            next_attempt_at = NULL
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(executor)
    .await?;
    Ok(())
}
