//! # Cash Session Repository
//!
//! Register sessions: opening float, closing count, sales total.

use minisuper_core::{CashSession, SalesStats};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::error::DbResult;
use crate::repository::sale;

/// Repository for cash session operations.
#[derive(Debug, Clone)]
pub struct CashSessionRepository {
    pool: SqlitePool,
}

impl CashSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CashSessionRepository { pool }
    }

    pub async fn get(&self, local_id: &str) -> DbResult<Option<CashSession>> {
        find(&self.pool, local_id).await
    }

    /// The OPEN session of a user, if any.
    pub async fn current(&self, user_id: &str) -> DbResult<Option<CashSession>> {
        find_open_for_user(&self.pool, user_id).await
    }

    /// Live totals of the COMPLETED sales recorded in a session.
    pub async fn stats(&self, local_id: &str) -> DbResult<SalesStats> {
        sale::session_stats(&self.pool, local_id).await
    }

    /// Sessions of a user, newest first.
    pub async fn list_for_user(&self, user_id: &str, limit: u32) -> DbResult<Vec<CashSession>> {
        let sessions = sqlx::query_as::<_, CashSession>(
            "SELECT * FROM cash_sessions WHERE user_id = ?1 ORDER BY opened_at DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }
}

pub(crate) async fn find<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
) -> DbResult<Option<CashSession>> {
    let session =
        sqlx::query_as::<_, CashSession>("SELECT * FROM cash_sessions WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(executor)
            .await?;
    Ok(session)
}

pub(crate) async fn find_open_for_user<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: &str,
) -> DbResult<Option<CashSession>> {
    let session = sqlx::query_as::<_, CashSession>(
        "SELECT * FROM cash_sessions WHERE user_id = ?1 AND status = 'OPEN'",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(session)
}

pub(crate) async fn insert<'e, E: SqliteExecutor<'e>>(
    executor: E,
    session: &CashSession,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO cash_sessions (
            local_id, server_id, user_id, start_amount_cents, end_amount_cents,
            total_sales_cents, status, opened_at, closed_at, notes,
            synced, pending_action, last_modified
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&session.local_id)
    .bind(&session.server_id)
    .bind(&session.user_id)
    .bind(session.start_amount_cents)
    .bind(session.end_amount_cents)
    .bind(session.total_sales_cents)
    .bind(session.status)
    .bind(session.opened_at)
    .bind(session.closed_at)
    .bind(&session.notes)
    .bind(session.synced)
    .bind(session.pending_action)
    .bind(session.last_modified)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn update<'e, E: SqliteExecutor<'e>>(
    executor: E,
    session: &CashSession,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE cash_sessions SET
            end_amount_cents = ?2, total_sales_cents = ?3, status = ?4,
            closed_at = ?5, notes = ?6, synced = ?7, pending_action = ?8,
            last_modified = ?9
        WHERE local_id = ?1
        "#,
    )
    .bind(&session.local_id)
    .bind(session.end_amount_cents)
    .bind(session.total_sales_cents)
    .bind(session.status)
    .bind(session.closed_at)
    .bind(&session.notes)
    .bind(session.synced)
    .bind(session.pending_action)
    .bind(session.last_modified)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn mark_synced<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
    server_id: &str,
    fully_synced: bool,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE cash_sessions SET
            server_id = ?2,
            synced = CASE WHEN ?3 THEN 1 ELSE synced END,
            pending_action = CASE WHEN ?3 THEN NULL ELSE pending_action END
        WHERE local_id = ?1
        "#,
    )
    .bind(local_id)
    .bind(server_id)
    .bind(fully_synced)
    .execute(executor)
    .await?;
    Ok(())
}
