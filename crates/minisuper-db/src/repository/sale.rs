//! # Sale Repository
//!
//! Sales with their ordered items, daily statistics and sale numbering.
//!
//! ## Sale Numbers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  YYYYMMDD NNNN                                                          │
//! │  20241019 0001  ← first sale of the day                                │
//! │  20241019 0002                                                          │
//! │  20241020 0001  ← sequence resets daily                                │
//! │                                                                         │
//! │  next = max(NNNN with today's prefix) + 1, computed inside the         │
//! │  writer's transaction while it holds the mutation lock, so two         │
//! │  local sales can never pick the same number.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use minisuper_core::{
    Sale, SaleFilter, SaleItem, SaleStatus, SalesStats, SyncAction, ValidationError,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

const DEFAULT_LIST_LIMIT: u32 = 200;
const MAX_DAILY_SEQUENCE: u32 = 9999;

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale (with items) by local id.
    pub async fn get(&self, local_id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        find(&mut *conn, local_id).await
    }

    /// Gets a sale (with items) by sale number.
    pub async fn get_by_sale_number(&self, sale_number: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE sale_number = ?1")
            .bind(sale_number)
            .fetch_optional(&mut *conn)
            .await?;
        with_items(&mut *conn, sale).await
    }

    /// Gets a sale (with items) by server id.
    pub async fn get_by_server_id(&self, server_id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE server_id = ?1")
            .bind(server_id)
            .fetch_optional(&mut *conn)
            .await?;
        with_items(&mut *conn, sale).await
    }

    /// Lists sales matching a filter, newest first.
    pub async fn list(&self, filter: &SaleFilter) -> DbResult<Vec<Sale>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM sales WHERE 1 = 1");

        if let Some(from) = filter.from {
            query.push(" AND date >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND date < ").push_bind(to);
        }
        if let Some(user_id) = &filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(method) = filter.payment_method {
            query.push(" AND payment_method = ").push_bind(method);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        query
            .push(" ORDER BY date DESC, sale_number DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT) as i64);

        let mut conn = self.pool.acquire().await?;
        let mut sales = query.build_query_as::<Sale>().fetch_all(&mut *conn).await?;
        for sale in &mut sales {
            sale.items = items_for(&mut *conn, &sale.local_id).await?;
        }

        debug!(count = sales.len(), "Listed sales");
        Ok(sales)
    }

    /// COMPLETED sales of one UTC calendar day.
    pub async fn daily_stats(&self, date: NaiveDate) -> DbResult<SalesStats> {
        let (start, end) = day_bounds(date);
        let mut query = stats_query();
        query
            .push(" AND s.date >= ")
            .push_bind(start)
            .push(" AND s.date < ")
            .push_bind(end);
        fetch_stats(&self.pool, query).await
    }

    /// COMPLETED sales recorded during a cash session.
    pub async fn session_stats(&self, cash_session_id: &str) -> DbResult<SalesStats> {
        session_stats(&self.pool, cash_session_id).await
    }

    /// Previews the next sale number for a day.
    ///
    /// The number actually assigned is computed again under the mutation lock
    /// when the sale is recorded.
    pub async fn generate_sale_number(&self, date: NaiveDate) -> DbResult<String> {
        next_sale_number(&self.pool, date).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `[start, end)` of a UTC calendar day.
pub(crate) fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

fn stats_query() -> QueryBuilder<'static, Sqlite> {
    QueryBuilder::new(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(s.total_cents), 0),
            COALESCE(SUM((SELECT SUM(i.quantity) FROM sale_items i
                          WHERE i.sale_local_id = s.local_id)), 0)
        FROM sales s
        WHERE s.status = 'COMPLETED'
        "#,
    )
}

async fn fetch_stats<'e, E: SqliteExecutor<'e>>(
    executor: E,
    mut query: QueryBuilder<'_, Sqlite>,
) -> DbResult<SalesStats> {
    let (sales_count, total_sales_cents, total_items) = query
        .build_query_as::<(i64, i64, i64)>()
        .fetch_one(executor)
        .await?;
    Ok(SalesStats {
        total_sales_cents,
        total_items,
        sales_count,
    })
}

pub(crate) async fn session_stats<'e, E: SqliteExecutor<'e>>(
    executor: E,
    cash_session_id: &str,
) -> DbResult<SalesStats> {
    let mut query = stats_query();
    query
        .push(" AND s.cash_session_id = ")
        .push_bind(cash_session_id.to_string());
    fetch_stats(executor, query).await
}

async fn with_items(conn: &mut SqliteConnection, sale: Option<Sale>) -> DbResult<Option<Sale>> {
    match sale {
        Some(mut sale) => {
            sale.items = items_for(&mut *conn, &sale.local_id).await?;
            Ok(Some(sale))
        }
        None => Ok(None),
    }
}

async fn items_for<'e, E: SqliteExecutor<'e>>(
    executor: E,
    sale_local_id: &str,
) -> DbResult<Vec<SaleItem>> {
    let items = sqlx::query_as::<_, SaleItem>(
        "SELECT * FROM sale_items WHERE sale_local_id = ?1 ORDER BY position",
    )
    .bind(sale_local_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

// =============================================================================
// Row Operations (composable into transactions)
// =============================================================================

pub(crate) async fn find(conn: &mut SqliteConnection, local_id: &str) -> DbResult<Option<Sale>> {
    let sale = sqlx::query_as::<_, Sale>("SELECT * FROM sales WHERE local_id = ?1")
        .bind(local_id)
        .fetch_optional(&mut *conn)
        .await?;
    with_items(conn, sale).await
}

/// True when a sale with this server id or sale number is already stored.
pub(crate) async fn exists<'e, E: SqliteExecutor<'e>>(
    executor: E,
    server_id: Option<&str>,
    sale_number: &str,
) -> DbResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sales WHERE sale_number = ?1 OR (?2 IS NOT NULL AND server_id = ?2)",
    )
    .bind(sale_number)
    .bind(server_id)
    .fetch_one(executor)
    .await?;
    Ok(count > 0)
}

/// Next `YYYYMMDDNNNN` for a day.
pub(crate) async fn next_sale_number<'e, E: SqliteExecutor<'e>>(
    executor: E,
    date: NaiveDate,
) -> DbResult<String> {
    let prefix = date.format("%Y%m%d").to_string();

    let last: Option<String> = sqlx::query_scalar(
        "SELECT sale_number FROM sales WHERE sale_number GLOB ?1 ORDER BY sale_number DESC LIMIT 1",
    )
    .bind(format!("{}[0-9][0-9][0-9][0-9]", prefix))
    .fetch_optional(executor)
    .await?;

    let next = match last {
        Some(number) => {
            number[prefix.len()..]
                .parse::<u32>()
                .map_err(|e| DbError::Corrupt(format!("bad sale number {}: {}", number, e)))?
                + 1
        }
        None => 1,
    };

    if next > MAX_DAILY_SEQUENCE {
        return Err(ValidationError::OutOfRange {
            field: "daily sale sequence".to_string(),
            min: 1,
            max: MAX_DAILY_SEQUENCE as i64,
        }
        .into());
    }

    Ok(format!("{}{:04}", prefix, next))
}

/// Inserts a sale row and all its items.
pub(crate) async fn insert(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sales (
            local_id, server_id, sale_number, date,
            subtotal_cents, tax_cents, discount_cents, total_cents,
            payment_method, user_id, customer_id, cash_session_id, notes, status,
            created_at, last_modified, synced, pending_action
        ) VALUES (
            ?1, ?2, ?3, ?4,
            ?5, ?6, ?7, ?8,
            ?9, ?10, ?11, ?12, ?13, ?14,
            ?15, ?16, ?17, ?18
        )
        "#,
    )
    .bind(&sale.local_id)
    .bind(&sale.server_id)
    .bind(&sale.sale_number)
    .bind(sale.date)
    .bind(sale.subtotal_cents)
    .bind(sale.tax_cents)
    .bind(sale.discount_cents)
    .bind(sale.total_cents)
    .bind(sale.payment_method)
    .bind(&sale.user_id)
    .bind(&sale.customer_id)
    .bind(&sale.cash_session_id)
    .bind(&sale.notes)
    .bind(sale.status)
    .bind(sale.created_at)
    .bind(sale.last_modified)
    .bind(sale.synced)
    .bind(sale.pending_action)
    .execute(&mut *conn)
    .await?;

    for item in &sale.items {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                local_id, sale_local_id, position, product_local_id, product_id,
                product_code, product_name, quantity, unit_price_cents,
                discount_cents, subtotal_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&item.local_id)
        .bind(&item.sale_local_id)
        .bind(item.position)
        .bind(&item.product_local_id)
        .bind(&item.product_id)
        .bind(&item.product_code)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.discount_cents)
        .bind(item.subtotal_cents)
        .execute(&mut *conn)
        .await?;
    }

    debug!(
        sale_number = %sale.sale_number,
        items = sale.items.len(),
        "Inserted sale"
    );
    Ok(())
}

pub(crate) async fn update_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
    status: SaleStatus,
    pending_action: SyncAction,
    last_modified: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sales SET status = ?2, pending_action = ?3, synced = 0, last_modified = ?4
        WHERE local_id = ?1
        "#,
    )
    .bind(local_id)
    .bind(status)
    .bind(pending_action)
    .bind(last_modified)
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
        UPDATE sales SET
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2024, 10, 19).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start.to_rfc3339(), "2024-10-19T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-10-20T00:00:00+00:00");
    }
}
