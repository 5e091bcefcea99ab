//! # Product Repository
//!
//! Catalog reads, plus the row-level writes the Mutation Recorder and the
//! Sync Store compose into transactions.
//!
//! ## Product Filters
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ProductFilter { category, active, search, low_stock, limit }          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SELECT * FROM products WHERE 1 = 1                                    │
//! │     AND category = ?                       (category)                  │
//! │     AND active = ?                         (active)                    │
//! │     AND (name LIKE ? OR code LIKE ?        (search, substring)         │
//! │          OR barcode LIKE ?)                                            │
//! │     AND stock <= min_stock                 (low_stock)                 │
//! │  ORDER BY name LIMIT ?                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use minisuper_core::validation::validate_search_query;
use minisuper_core::{Product, ProductFilter};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

const DEFAULT_LIST_LIMIT: u32 = 500;

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by local id.
    pub async fn get(&self, local_id: &str) -> DbResult<Option<Product>> {
        find(&self.pool, local_id).await
    }

    /// Gets a product by server id.
    pub async fn get_by_server_id(&self, server_id: &str) -> DbResult<Option<Product>> {
        find_by_server_id(&self.pool, server_id).await
    }

    /// Gets the active product with this code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Product>> {
        find_active_by_code(&self.pool, code).await
    }

    /// Gets the active product with this barcode.
    pub async fn get_by_barcode(&self, barcode: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE barcode = ?1 AND active = 1 LIMIT 1",
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    /// Lists products matching a filter, ordered by name.
    pub async fn list(&self, filter: &ProductFilter) -> DbResult<Vec<Product>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM products WHERE 1 = 1");

        if let Some(category) = &filter.category {
            query.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(active) = filter.active {
            query.push(" AND active = ").push_bind(active);
        }
        if let Some(search) = filter.search.as_deref().map(str::trim) {
            validate_search_query(search)?;
            if !search.is_empty() {
                let pattern = format!("%{}%", escape_like(search));
                query
                    .push(" AND (name LIKE ")
                    .push_bind(pattern.clone())
                    .push(r" ESCAPE '\' OR code LIKE ")
                    .push_bind(pattern.clone())
                    .push(r" ESCAPE '\' OR barcode LIKE ")
                    .push_bind(pattern)
                    .push(r" ESCAPE '\')");
            }
        }
        if filter.low_stock {
            query.push(" AND stock <= min_stock");
        }

        query
            .push(" ORDER BY name COLLATE NOCASE, code LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT) as i64);

        let products = query.build_query_as::<Product>().fetch_all(&self.pool).await?;

        debug!(count = products.len(), "Listed products");
        Ok(products)
    }

    /// Active products at or below their minimum stock.
    pub async fn low_stock(&self) -> DbResult<Vec<Product>> {
        self.list(&ProductFilter {
            active: Some(true),
            low_stock: true,
            ..Default::default()
        })
        .await
    }

    /// Products with a change not yet acknowledged by the server.
    pub async fn unsynced(&self) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE synced = 0 ORDER BY last_modified",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }
}

// =============================================================================
// Row Operations (composable into transactions)
// =============================================================================

pub(crate) async fn find<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
) -> DbResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE local_id = ?1")
        .bind(local_id)
        .fetch_optional(executor)
        .await?;
    Ok(product)
}

pub(crate) async fn find_by_server_id<'e, E: SqliteExecutor<'e>>(
    executor: E,
    server_id: &str,
) -> DbResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE server_id = ?1")
        .bind(server_id)
        .fetch_optional(executor)
        .await?;
    Ok(product)
}

pub(crate) async fn find_active_by_code<'e, E: SqliteExecutor<'e>>(
    executor: E,
    code: &str,
) -> DbResult<Option<Product>> {
    let product =
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE code = ?1 AND active = 1")
            .bind(code)
            .fetch_optional(executor)
            .await?;
    Ok(product)
}

pub(crate) async fn insert<'e, E: SqliteExecutor<'e>>(
    executor: E,
    product: &Product,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO products (
            local_id, server_id, name, code, barcode,
            price_cents, cost_cents, stock, min_stock, max_stock,
            category, brand, description, unit, image,
            active, synced, pending_action, created_at, last_modified
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20
        )
        "#,
    )
    .bind(&product.local_id)
    .bind(&product.server_id)
    .bind(&product.name)
    .bind(&product.code)
    .bind(&product.barcode)
    .bind(product.price_cents)
    .bind(product.cost_cents)
    .bind(product.stock)
    .bind(product.min_stock)
    .bind(product.max_stock)
    .bind(&product.category)
    .bind(&product.brand)
    .bind(&product.description)
    .bind(&product.unit)
    .bind(&product.image)
    .bind(product.active)
    .bind(product.synced)
    .bind(product.pending_action)
    .bind(product.created_at)
    .bind(product.last_modified)
    .execute(executor)
    .await?;
    Ok(())
}

/// Rewrites every mutable column of an existing row.
pub(crate) async fn update<'e, E: SqliteExecutor<'e>>(
    executor: E,
    product: &Product,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE products SET
            server_id = ?2, name = ?3, code = ?4, barcode = ?5,
            price_cents = ?6, cost_cents = ?7, stock = ?8, min_stock = ?9, max_stock = ?10,
            category = ?11, brand = ?12, description = ?13, unit = ?14, image = ?15,
            active = ?16, synced = ?17, pending_action = ?18, last_modified = ?19
        WHERE local_id = ?1
        "#,
    )
    .bind(&product.local_id)
    .bind(&product.server_id)
    .bind(&product.name)
    .bind(&product.code)
    .bind(&product.barcode)
    .bind(product.price_cents)
    .bind(product.cost_cents)
    .bind(product.stock)
    .bind(product.min_stock)
    .bind(product.max_stock)
    .bind(&product.category)
    .bind(&product.brand)
    .bind(&product.description)
    .bind(&product.unit)
    .bind(&product.image)
    .bind(product.active)
    .bind(product.synced)
    .bind(product.pending_action)
    .bind(product.last_modified)
    .execute(executor)
    .await?;
    Ok(())
}

/// Applies a stock delta without touching sync bookkeeping.
///
/// Sale side effects use this: the server applies the same delta when the
/// sale itself is uploaded. Returns false when the delta would go negative.
pub(crate) async fn apply_stock_delta<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
    delta: i64,
) -> DbResult<bool> {
    let result = sqlx::query(
        "UPDATE products SET stock = stock + ?2 WHERE local_id = ?1 AND stock + ?2 >= 0",
    )
    .bind(local_id)
    .bind(delta)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Records the server id and, when nothing else is queued, the synced flag.
pub(crate) async fn mark_synced<'e, E: SqliteExecutor<'e>>(
    executor: E,
    local_id: &str,
    server_id: &str,
    fully_synced: bool,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE products SET
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

/// Makes `%`, `_` and `\` match themselves in a `LIKE ... ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
