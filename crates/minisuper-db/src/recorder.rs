//! # Mutation Recorder
//!
//! Every local create/update/delete goes through here. Each call validates
//! its input, takes the mutation lock, writes the entity and appends a sync
//! intent carrying a full snapshot, all in one transaction.
//!
//! ## Record + Queue
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  recorder.create_sale(NewSale)                                          │
//! │       │                                                                 │
//! │       ├── validate_new_sale()           ✗ → ValidationError, no write  │
//! │       │                                                                 │
//! │       ├── write_lock.lock()             one local writer at a time     │
//! │       ├── BEGIN                                                         │
//! │       │    ├── per item: stock check   ✗ → InsufficientStock, ROLLBACK │
//! │       │    │             stock -= qty                                   │
//! │       │    ├── SaleTotals::compute / reconcile                         │
//! │       │    ├── next_sale_number(today)                                 │
//! │       │    ├── INSERT sales, sale_items                                │
//! │       │    └── INSERT sync_queue ('sale', CREATE, snapshot)            │
//! │       └── COMMIT                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A crash can never leave a state change without its queue entry, and an
//! early `?` return drops the transaction, which rolls it back.

use chrono::{DateTime, Utc};
use minisuper_core::protocol::{CashSessionPayload, ProductPayload, SalePayload};
use minisuper_core::totals::line_subtotal;
use minisuper_core::validation::{
    validate_new_product, validate_new_sale, validate_non_negative, validate_notes,
    validate_product_update,
};
use minisuper_core::{
    CashSession, CashSessionStatus, CoreError, EntityType, Money, NewProduct, NewSale, Product,
    ProductUpdate, Sale, SaleItem, SaleStatus, SaleTotals, SyncAction, TaxRate, ValidationError,
    DEFAULT_UNIT,
};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::{cash_session, product, sale, sync_queue};

/// Writes local mutations together with their sync intents.
///
/// Obtained from [`Database::recorder`](crate::Database::recorder).
#[derive(Debug, Clone)]
pub struct MutationRecorder {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    tax_rate: TaxRate,
}

/// The pending action an entity shows after another local change.
///
/// An entity the server has never seen stays a CREATE whatever follows.
fn merge_action(existing: Option<SyncAction>, next: SyncAction) -> SyncAction {
    match existing {
        Some(SyncAction::Create) => SyncAction::Create,
        _ => next,
    }
}

async fn queue_snapshot<T: Serialize>(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_local_id: &str,
    action: SyncAction,
    snapshot: &T,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let payload = serde_json::to_string(snapshot)?;
    sync_queue::enqueue(conn, entity_type, entity_local_id, action, payload, now).await?;
    Ok(())
}

impl MutationRecorder {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>, tax_rate: TaxRate) -> Self {
        MutationRecorder {
            pool,
            write_lock,
            tax_rate,
        }
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Creates a product and queues a CREATE.
    pub async fn create_product(&self, input: NewProduct) -> DbResult<Product> {
        validate_new_product(&input)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let code = input.code.trim().to_string();
        if product::find_active_by_code(&mut *tx, &code).await?.is_some() {
            return Err(ValidationError::Duplicate {
                field: "code".to_string(),
                value: code,
            }
            .into());
        }

        let now = Utc::now();
        let created = Product {
            local_id: Uuid::new_v4().to_string(),
            server_id: None,
            name: input.name.trim().to_string(),
            code,
            barcode: input.barcode.filter(|b| !b.trim().is_empty()),
            price_cents: input.price_cents,
            cost_cents: input.cost_cents,
            stock: input.stock,
            min_stock: input.min_stock,
            max_stock: input.max_stock,
            category: input.category,
            brand: input.brand,
            description: input.description,
            unit: input.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            image: input.image,
            active: true,
            synced: false,
            pending_action: Some(SyncAction::Create),
            created_at: now,
            last_modified: now,
        };

        product::insert(&mut *tx, &created).await?;
        queue_snapshot(
            &mut tx,
            EntityType::Product,
            &created.local_id,
            SyncAction::Create,
            &ProductPayload::from_product(&created, SyncAction::Create),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(code = %created.code, local_id = %created.local_id, "Product created");
        Ok(created)
    }

    /// Applies a partial update and queues an UPDATE with the full snapshot.
    pub async fn update_product(&self, local_id: &str, update: ProductUpdate) -> DbResult<Product> {
        validate_product_update(&update)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut current = product::find(&mut *tx, local_id)
            .await?
            .filter(|p| p.active || update.active == Some(true))
            .ok_or_else(|| CoreError::ProductNotFound(local_id.to_string()))?;

        if update.is_empty() {
            return Ok(current);
        }

        if let Some(code) = update.code.as_deref().map(str::trim) {
            if code != current.code {
                if let Some(other) = product::find_active_by_code(&mut *tx, code).await? {
                    if other.local_id != current.local_id {
                        return Err(ValidationError::Duplicate {
                            field: "code".to_string(),
                            value: code.to_string(),
                        }
                        .into());
                    }
                }
                current.code = code.to_string();
            }
        }

        let ProductUpdate {
            name,
            code: _,
            barcode,
            price_cents,
            cost_cents,
            stock,
            min_stock,
            max_stock,
            category,
            brand,
            description,
            unit,
            image,
            active,
        } = update;

        if let Some(name) = name {
            current.name = name.trim().to_string();
        }
        if let Some(barcode) = barcode {
            current.barcode = Some(barcode).filter(|b| !b.trim().is_empty());
        }
        if let Some(price) = price_cents {
            current.price_cents = price;
        }
        if let Some(cost) = cost_cents {
            current.cost_cents = cost;
        }
        if let Some(stock) = stock {
            current.stock = stock;
        }
        if let Some(min) = min_stock {
            current.min_stock = min;
        }
        if max_stock.is_some() {
            current.max_stock = max_stock;
        }
        if category.is_some() {
            current.category = category;
        }
        if brand.is_some() {
            current.brand = brand;
        }
        if description.is_some() {
            current.description = description;
        }
        if let Some(unit) = unit {
            current.unit = unit;
        }
        if image.is_some() {
            current.image = image;
        }
        if let Some(active) = active {
            current.active = active;
        }

        self.write_product_change(&mut tx, &mut current, SyncAction::Update)
            .await?;
        tx.commit().await?;

        info!(code = %current.code, local_id = %current.local_id, "Product updated");
        Ok(current)
    }

    /// Soft-deletes a product (`active = false`) and queues a DELETE.
    pub async fn delete_product(&self, local_id: &str) -> DbResult<Product> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut current = product::find(&mut *tx, local_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| CoreError::ProductNotFound(local_id.to_string()))?;

        current.active = false;
        self.write_product_change(&mut tx, &mut current, SyncAction::Delete)
            .await?;
        tx.commit().await?;

        info!(code = %current.code, local_id = %current.local_id, "Product deleted");
        Ok(current)
    }

    /// Adjusts stock by `delta` (inventory count, delivery, shrinkage).
    ///
    /// Fails with `InsufficientStock` rather than going below zero.
    pub async fn adjust_stock(&self, local_id: &str, delta: i64) -> DbResult<Product> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut current = product::find(&mut *tx, local_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| CoreError::ProductNotFound(local_id.to_string()))?;

        let next = current.stock + delta;
        if next < 0 {
            return Err(CoreError::InsufficientStock {
                code: current.code.clone(),
                available: current.stock,
                requested: -delta,
            }
            .into());
        }
        current.stock = next;

        self.write_product_change(&mut tx, &mut current, SyncAction::Update)
            .await?;
        tx.commit().await?;

        debug!(code = %current.code, delta, stock = current.stock, "Stock adjusted");
        Ok(current)
    }

    async fn write_product_change(
        &self,
        conn: &mut SqliteConnection,
        current: &mut Product,
        action: SyncAction,
    ) -> DbResult<()> {
        let now = Utc::now();
        current.last_modified = now;
        current.synced = false;
        current.pending_action = Some(merge_action(current.pending_action, action));

        product::update(&mut *conn, current).await?;
        queue_snapshot(
            conn,
            EntityType::Product,
            &current.local_id,
            action,
            &ProductPayload::from_product(current, action),
            now,
        )
        .await
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Records a completed sale.
    ///
    /// Checks and decrements stock per item, recomputes totals (and checks
    /// them against `expected_total_cents` when given), assigns the next sale
    /// number of the day, links the seller's open cash session and queues a
    /// single `sale` CREATE. Any failure aborts the whole sale.
    pub async fn create_sale(&self, input: NewSale) -> DbResult<Sale> {
        validate_new_sale(&input)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let sale_local_id = Uuid::new_v4().to_string();
        let mut items = Vec::with_capacity(input.items.len());

        for (position, requested) in input.items.iter().enumerate() {
            let item_product = product::find(&mut *tx, &requested.product_local_id)
                .await?
                .filter(|p| p.active)
                .ok_or_else(|| CoreError::ProductNotFound(requested.product_local_id.clone()))?;

            if item_product.stock < requested.quantity {
                return Err(CoreError::InsufficientStock {
                    code: item_product.code.clone(),
                    available: item_product.stock,
                    requested: requested.quantity,
                }
                .into());
            }

            let unit_price = Money::from_cents(
                requested.unit_price_cents.unwrap_or(item_product.price_cents),
            );
            let subtotal = line_subtotal(
                requested.quantity,
                unit_price,
                Money::from_cents(requested.discount_cents),
            )?;

            if !product::apply_stock_delta(&mut *tx, &item_product.local_id, -requested.quantity)
                .await?
            {
                return Err(CoreError::InsufficientStock {
                    code: item_product.code.clone(),
                    available: item_product.stock,
                    requested: requested.quantity,
                }
                .into());
            }

            items.push(SaleItem {
                local_id: Uuid::new_v4().to_string(),
                sale_local_id: sale_local_id.clone(),
                position: position as i64,
                product_local_id: Some(item_product.local_id.clone()),
                product_id: item_product.server_id.clone(),
                product_code: item_product.code.clone(),
                product_name: item_product.name.clone(),
                quantity: requested.quantity,
                unit_price_cents: unit_price.cents(),
                discount_cents: requested.discount_cents,
                subtotal_cents: subtotal.cents(),
            });
        }

        let totals = SaleTotals::compute(
            items.iter().map(SaleItem::subtotal),
            Money::from_cents(input.discount_cents),
            self.tax_rate,
        )?;
        if let Some(expected) = input.expected_total_cents {
            totals.reconcile(Money::from_cents(expected))?;
        }

        let sale_number = sale::next_sale_number(&mut *tx, now.date_naive()).await?;
        let cash_session_id = cash_session::find_open_for_user(&mut *tx, &input.user_id)
            .await?
            .map(|session| session.local_id);

        let recorded = Sale {
            local_id: sale_local_id,
            server_id: None,
            sale_number,
            date: now,
            subtotal_cents: totals.subtotal.cents(),
            tax_cents: totals.tax.cents(),
            discount_cents: totals.discount.cents(),
            total_cents: totals.total.cents(),
            payment_method: input.payment_method,
            user_id: input.user_id,
            customer_id: input.customer_id,
            cash_session_id,
            notes: input.notes,
            status: SaleStatus::Completed,
            items,
            created_at: now,
            last_modified: now,
            synced: false,
            pending_action: Some(SyncAction::Create),
        };
        SaleTotals::verify_sale(&recorded)?;

        sale::insert(&mut tx, &recorded).await?;
        queue_snapshot(
            &mut tx,
            EntityType::Sale,
            &recorded.local_id,
            SyncAction::Create,
            &SalePayload::from_sale(&recorded, SyncAction::Create),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            sale_number = %recorded.sale_number,
            total_cents = recorded.total_cents,
            items = recorded.items.len(),
            "Sale recorded"
        );
        Ok(recorded)
    }

    /// Moves a sale to a new status and queues an UPDATE.
    ///
    /// Cancelling or refunding a COMPLETED sale puts its units back in stock.
    pub async fn update_sale_status(&self, local_id: &str, status: SaleStatus) -> DbResult<Sale> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = sale::find(&mut tx, local_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(local_id.to_string()))?;

        if !current.status.can_transition_to(status) {
            return Err(CoreError::InvalidSaleStatus {
                sale_number: current.sale_number.clone(),
                current_status: current.status.to_string(),
                requested_status: status.to_string(),
            }
            .into());
        }

        if status.restores_stock() && current.status == SaleStatus::Completed {
            for item in &current.items {
                let Some(product_local_id) = item.product_local_id.as_deref() else {
                    continue;
                };
                if !product::apply_stock_delta(&mut *tx, product_local_id, item.quantity).await? {
                    warn!(product_local_id, "Product missing while restoring stock");
                }
            }
        }

        let now = Utc::now();
        let action = merge_action(current.pending_action, SyncAction::Update);
        sale::update_status(&mut *tx, local_id, status, action, now).await?;

        let updated = sale::find(&mut tx, local_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", local_id))?;
        queue_snapshot(
            &mut tx,
            EntityType::Sale,
            local_id,
            SyncAction::Update,
            &SalePayload::from_sale(&updated, SyncAction::Update),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            sale_number = %updated.sale_number,
            status = %updated.status,
            "Sale status changed"
        );
        Ok(updated)
    }

    // =========================================================================
    // Cash Sessions
    // =========================================================================

    /// Opens a cash session. A user can have at most one OPEN session.
    pub async fn open_cash_session(
        &self,
        user_id: &str,
        start_amount_cents: i64,
        notes: Option<String>,
    ) -> DbResult<CashSession> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::required("user_id").into());
        }
        validate_non_negative("start_amount", start_amount_cents)?;
        validate_notes(notes.as_deref())?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if cash_session::find_open_for_user(&mut *tx, user_id)
            .await?
            .is_some()
        {
            return Err(CoreError::CashSessionAlreadyOpen {
                user_id: user_id.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let session = CashSession {
            local_id: Uuid::new_v4().to_string(),
            server_id: None,
            user_id: user_id.to_string(),
            start_amount_cents,
            end_amount_cents: None,
            total_sales_cents: 0,
            status: CashSessionStatus::Open,
            opened_at: now,
            closed_at: None,
            notes,
            synced: false,
            pending_action: Some(SyncAction::Create),
            last_modified: now,
        };

        cash_session::insert(&mut *tx, &session).await?;
        queue_snapshot(
            &mut tx,
            EntityType::CashSession,
            &session.local_id,
            SyncAction::Create,
            &CashSessionPayload::from_session(&session, SyncAction::Create),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(user_id, local_id = %session.local_id, "Cash session opened");
        Ok(session)
    }

    /// Closes a session, totalling its COMPLETED sales.
    pub async fn close_cash_session(
        &self,
        local_id: &str,
        end_amount_cents: i64,
        notes: Option<String>,
    ) -> DbResult<CashSession> {
        validate_non_negative("end_amount", end_amount_cents)?;
        validate_notes(notes.as_deref())?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut session = cash_session::find(&mut *tx, local_id)
            .await?
            .ok_or_else(|| CoreError::CashSessionNotFound(local_id.to_string()))?;
        if !session.is_open() {
            return Err(CoreError::CashSessionClosed(local_id.to_string()).into());
        }

        let stats = sale::session_stats(&mut *tx, local_id).await?;
        let now = Utc::now();

        session.end_amount_cents = Some(end_amount_cents);
        session.total_sales_cents = stats.total_sales_cents;
        session.status = CashSessionStatus::Closed;
        session.closed_at = Some(now);
        if notes.is_some() {
            session.notes = notes;
        }
        session.synced = false;
        session.pending_action = Some(merge_action(session.pending_action, SyncAction::Update));
        session.last_modified = now;

        cash_session::update(&mut *tx, &session).await?;
        queue_snapshot(
            &mut tx,
            EntityType::CashSession,
            &session.local_id,
            SyncAction::Update,
            &CashSessionPayload::from_session(&session, SyncAction::Update),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            local_id,
            total_sales_cents = session.total_sales_cents,
            sales = stats.sales_count,
            "Cash session closed"
        );
        Ok(session)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
