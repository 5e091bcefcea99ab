//! Database layer for the sync server.
//!
//! SQLite pool plus row operations. Row operations take any executor so the
//! sync service can compose several of them into one per-item transaction.

use chrono::{DateTime, Utc};
use minisuper_core::protocol::{
    CashSessionPayload, ProductPayload, SaleItemPayload, SalePayload,
};
use minisuper_core::{CashSessionStatus, EntityType, PaymentMethod, SaleStatus, SyncAction};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/server");

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct ServerDatabase {
    pool: SqlitePool,
}

impl ServerDatabase {
    /// Opens the database and runs migrations.
    pub async fn connect(config: &ServerConfig) -> ServerResult<Self> {
        let url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .create_if_missing(true);

        // An in-memory store exists only as long as its single connection.
        let (max, idle) = if config.is_in_memory() {
            (1, None)
        } else {
            (config.max_connections, Some(std::time::Duration::from_secs(600)))
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .min_connections(1)
            .idle_timeout(idle)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        info!(path = %config.database_path.display(), max_connections = max, "Database pool created");

        let db = ServerDatabase { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> ServerResult<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Products written after `since` (all when `None`), oldest first.
    pub async fn products_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ServerResult<Vec<ProductRecord>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM products");
        if let Some(since) = since {
            query.push(" WHERE updated_at > ").push_bind(since);
        }
        query.push(" ORDER BY updated_at, id");

        let products = query.build_query_as::<ProductRecord>().fetch_all(&self.pool).await?;
        debug!(count = products.len(), "Loaded changed products");
        Ok(products)
    }

    /// Sales written after `since`, optionally restricted to one seller.
    pub async fn sales_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
        user_id: Option<&str>,
    ) -> ServerResult<Vec<(SaleRecord, Vec<SaleItemRecord>)>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM sales WHERE 1 = 1");
        if let Some(since) = since {
            query.push(" AND updated_at > ").push_bind(since);
        }
        if let Some(user_id) = user_id {
            query.push(" AND user_id = ").push_bind(user_id.to_string());
        }
        query.push(" ORDER BY updated_at, id");

        let sales = query.build_query_as::<SaleRecord>().fetch_all(&self.pool).await?;

        let mut with_items = Vec::with_capacity(sales.len());
        for sale in sales {
            let items = sale_items(&self.pool, &sale.id).await?;
            with_items.push((sale, items));
        }

        debug!(count = with_items.len(), "Loaded changed sales");
        Ok(with_items)
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ProductRecord {
    pub id: String,
    pub local_id: Option<String>,
    pub name: String,
    pub code: String,
    pub barcode: Option<String>,
    pub price: i64,
    pub cost: i64,
    pub stock: i64,
    pub min_stock: i64,
    pub max_stock: Option<i64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub unit: String,
    pub image: Option<String>,
    pub active: bool,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    pub fn to_payload(&self, action: SyncAction) -> ProductPayload {
        ProductPayload {
            id: self.id.clone(),
            local_id: self.local_id.clone().unwrap_or_default(),
            name: self.name.clone(),
            code: self.code.clone(),
            barcode: self.barcode.clone(),
            price: self.price,
            cost: self.cost,
            stock: self.stock,
            min_stock: self.min_stock,
            max_stock: self.max_stock,
            category: self.category.clone(),
            brand: self.brand.clone(),
            description: self.description.clone(),
            unit: self.unit.clone(),
            image: self.image.clone(),
            active: self.active,
            last_modified: self.updated_at,
            action,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SaleRecord {
    pub id: String,
    pub local_id: Option<String>,
    pub sale_number: String,
    pub date: DateTime<Utc>,
    pub subtotal: i64,
    pub tax: i64,
    pub discount: i64,
    pub total: i64,
    pub payment_method: PaymentMethod,
    pub user_id: String,
    pub customer_id: Option<String>,
    pub cash_session_local_id: Option<String>,
    pub notes: Option<String>,
    pub status: SaleStatus,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SaleRecord {
    pub fn to_payload(&self, items: &[SaleItemRecord], action: SyncAction) -> SalePayload {
        SalePayload {
            id: self.id.clone(),
            local_id: self.local_id.clone().unwrap_or_default(),
            sale_number: self.sale_number.clone(),
            date: self.date,
            subtotal: self.subtotal,
            tax: self.tax,
            discount: self.discount,
            total: self.total,
            payment_method: self.payment_method,
            user_id: self.user_id.clone(),
            customer_id: self.customer_id.clone(),
            cash_session_local_id: self.cash_session_local_id.clone(),
            notes: self.notes.clone(),
            status: self.status,
            items: items.iter().map(SaleItemRecord::to_payload).collect(),
            last_modified: self.updated_at,
            action,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SaleItemRecord {
    pub sale_id: String,
    pub product_id: Option<String>,
    pub product_code: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub discount: i64,
    pub subtotal: i64,
}

impl SaleItemRecord {
    fn to_payload(&self) -> SaleItemPayload {
        SaleItemPayload {
            product_id: self.product_id.clone().unwrap_or_default(),
            product_local_id: None,
            product_code: self.product_code.clone(),
            product_name: self.product_name.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            discount: self.discount,
            subtotal: self.subtotal,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CashSessionRecord {
    pub id: String,
    pub local_id: Option<String>,
    pub user_id: String,
    pub start_amount: i64,
    pub end_amount: Option<i64>,
    pub total_sales: i64,
    pub status: CashSessionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Product Rows
// =============================================================================

pub(crate) async fn find_product<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
) -> ServerResult<Option<ProductRecord>> {
    let product = sqlx::query_as::<_, ProductRecord>("SELECT * FROM products WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(product)
}

pub(crate) async fn find_product_by_code<'e, E: SqliteExecutor<'e>>(
    executor: E,
    code: &str,
) -> ServerResult<Option<ProductRecord>> {
    let product = sqlx::query_as::<_, ProductRecord>("SELECT * FROM products WHERE code = ?1")
        .bind(code)
        .fetch_optional(executor)
        .await?;
    Ok(product)
}

pub(crate) async fn find_product_by_local_id<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
) -> ServerResult<Option<ProductRecord>> {
    let product = sqlx::query_as::<_, ProductRecord>(
        "SELECT * FROM products WHERE local_id = ?1 ORDER BY created_at LIMIT 1",
    )
    .bind(local_id)
    .fetch_optional(executor)
    .await?;
    Ok(product)
}

pub(crate) async fn insert_product<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    p: &ProductPayload,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO products (
            id, local_id, name, code, barcode, price, cost, stock, min_stock,
            max_stock, category, brand, description, unit, image, active,
            last_modified, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)
        "#,
    )
    .bind(id)
    .bind(non_empty(&p.local_id))
    .bind(&p.name)
    .bind(&p.code)
    .bind(&p.barcode)
    .bind(p.price)
    .bind(p.cost)
    .bind(p.stock.max(0))
    .bind(p.min_stock)
    .bind(p.max_stock)
    .bind(&p.category)
    .bind(&p.brand)
    .bind(&p.description)
    .bind(&p.unit)
    .bind(&p.image)
    .bind(p.active)
    .bind(p.last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Overwrites every client-editable field.
pub(crate) async fn update_product<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    p: &ProductPayload,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        UPDATE products SET
            name = ?2, code = ?3, barcode = ?4, price = ?5, cost = ?6, stock = ?7,
            min_stock = ?8, max_stock = ?9, category = ?10, brand = ?11,
            description = ?12, unit = ?13, image = ?14, active = ?15,
            last_modified = ?16, updated_at = ?17
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(&p.name)
    .bind(&p.code)
    .bind(&p.barcode)
    .bind(p.price)
    .bind(p.cost)
    .bind(p.stock.max(0))
    .bind(p.min_stock)
    .bind(p.max_stock)
    .bind(&p.category)
    .bind(&p.brand)
    .bind(&p.description)
    .bind(&p.unit)
    .bind(&p.image)
    .bind(p.active)
    .bind(p.last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn deactivate_product<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    last_modified: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        "UPDATE products SET active = 0, last_modified = ?2, updated_at = ?3 WHERE id = ?1",
    )
    .bind(id)
    .bind(last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Adds `delta` to stock, never going below zero.
pub(crate) async fn adjust_stock<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    delta: i64,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query("UPDATE products SET stock = MAX(stock + ?2, 0), updated_at = ?3 WHERE id = ?1")
        .bind(id)
        .bind(delta)
        .bind(now)
        .execute(executor)
        .await?;
    Ok(())
}

// =============================================================================
// Sale Rows
// =============================================================================

pub(crate) async fn find_sale<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
) -> ServerResult<Option<SaleRecord>> {
    let sale = sqlx::query_as::<_, SaleRecord>("SELECT * FROM sales WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(sale)
}

pub(crate) async fn find_sale_by_number<'e, E: SqliteExecutor<'e>>(
    executor: E,
    sale_number: &str,
) -> ServerResult<Option<SaleRecord>> {
    let sale = sqlx::query_as::<_, SaleRecord>("SELECT * FROM sales WHERE sale_number = ?1")
        .bind(sale_number)
        .fetch_optional(executor)
        .await?;
    Ok(sale)
}

pub(crate) async fn insert_sale<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    s: &SalePayload,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sales (
            id, local_id, sale_number, date, subtotal, tax, discount, total,
            payment_method, user_id, customer_id, cash_session_local_id, notes,
            status, last_modified, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
        "#,
    )
    .bind(id)
    .bind(non_empty(&s.local_id))
    .bind(&s.sale_number)
    .bind(s.date)
    .bind(s.subtotal)
    .bind(s.tax)
    .bind(s.discount)
    .bind(s.total)
    .bind(s.payment_method)
    .bind(&s.user_id)
    .bind(&s.customer_id)
    .bind(&s.cash_session_local_id)
    .bind(&s.notes)
    .bind(s.status)
    .bind(s.last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn insert_sale_item<'e, E: SqliteExecutor<'e>>(
    executor: E,
    sale_id: &str,
    product_id: &str,
    item: &SaleItemPayload,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sale_items (
            sale_id, product_id, product_code, product_name, quantity,
            unit_price, discount, subtotal
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(sale_id)
    .bind(product_id)
    .bind(&item.product_code)
    .bind(&item.product_name)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.discount)
    .bind(item.subtotal)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn sale_items<'e, E: SqliteExecutor<'e>>(
    executor: E,
    sale_id: &str,
) -> ServerResult<Vec<SaleItemRecord>> {
    let items = sqlx::query_as::<_, SaleItemRecord>(
        r#"
        SELECT sale_id, product_id, product_code, product_name, quantity,
               unit_price, discount, subtotal
        FROM sale_items WHERE sale_id = ?1 ORDER BY id
        "#,
    )
    .bind(sale_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

pub(crate) async fn update_sale_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    status: SaleStatus,
    notes: Option<&str>,
    last_modified: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        UPDATE sales SET status = ?2, notes = ?3, last_modified = ?4, updated_at = ?5
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(notes)
    .bind(last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

// =============================================================================
// Cash Session Rows
// =============================================================================

pub(crate) async fn find_cash_session<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
) -> ServerResult<Option<CashSessionRecord>> {
    let session = sqlx::query_as::<_, CashSessionRecord>("SELECT * FROM cash_sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(session)
}

pub(crate) async fn find_cash_session_by_local_id<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
) -> ServerResult<Option<CashSessionRecord>> {
    let session = sqlx::query_as::<_, CashSessionRecord>(
        "SELECT * FROM cash_sessions WHERE local_id = ?1 ORDER BY created_at LIMIT 1",
    )
    .bind(local_id)
    .fetch_optional(executor)
    .await?;
    Ok(session)
}

pub(crate) async fn insert_cash_session<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    c: &CashSessionPayload,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO cash_sessions (
            id, local_id, user_id, start_amount, end_amount, total_sales, status,
            opened_at, closed_at, notes, last_modified, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
        "#,
    )
    .bind(id)
    .bind(non_empty(&c.local_id))
    .bind(&c.user_id)
    .bind(c.start_amount)
    .bind(c.end_amount)
    .bind(c.total_sales)
    .bind(c.status)
    .bind(c.opened_at)
    .bind(c.closed_at)
    .bind(&c.notes)
    .bind(c.last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn update_cash_session<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
    c: &CashSessionPayload,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        UPDATE cash_sessions SET
            end_amount = ?2, total_sales = ?3, status = ?4, closed_at = ?5,
            notes = ?6, last_modified = ?7, updated_at = ?8
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(c.end_amount)
    .bind(c.total_sales)
    .bind(c.status)
    .bind(c.closed_at)
    .bind(&c.notes)
    .bind(c.last_modified)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

// =============================================================================
// Record Writes
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct RecordWrite {
    pub writer: String,
    pub written_at: DateTime<Utc>,
}

/// Notes that `writer` changed a record at `now`.
pub(crate) async fn record_write<'e, E: SqliteExecutor<'e>>(
    executor: E,
    entity_type: EntityType,
    entity_id: &str,
    writer: &str,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO record_writes (entity_type, entity_id, writer, written_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(entity_type, entity_id, writer) DO UPDATE SET written_at = excluded.written_at
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(writer)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Latest write per writer for one record.
pub(crate) async fn record_writes<'e, E: SqliteExecutor<'e>>(
    executor: E,
    entity_type: EntityType,
    entity_id: &str,
) -> ServerResult<Vec<RecordWrite>> {
    let writes = sqlx::query_as::<_, RecordWrite>(
        "SELECT writer, written_at FROM record_writes WHERE entity_type = ?1 AND entity_id = ?2",
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(executor)
    .await?;
    Ok(writes)
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

