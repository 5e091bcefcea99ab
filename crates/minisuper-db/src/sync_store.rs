//! # Sync Store
//!
//! The Sync Manager's write side of the Local Store: server outcomes are
//! merged back here, under the same mutation lock the recorder uses.
//!
//! ## Upload Outcomes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  applied  → acknowledge()     entries removed, server_id stored,       │
//! │                               synced=1 once nothing else is queued     │
//! │  conflict → record_conflict() entries parked as CONFLICT               │
//! │  failed   → record_failure()  attempts+1, next_attempt_at              │
//! │           → dead_letter()     retry budget exhausted                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Download Merge
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  server product                                                         │
//! │   ├── known server_id, local synced      → overwrite local row          │
//! │   ├── known server_id, local unsynced    → skip (local wins until ack)  │
//! │   ├── unknown, code taken locally        → skip (conflict surfaces on   │
//! │   │                                         the local upload)           │
//! │   └── unknown                            → insert as synced             │
//! │                                                                         │
//! │  server sale                                                            │
//! │   ├── server_id or sale_number present   → skip                         │
//! │   └── otherwise                          → insert as synced (no stock   │
//! │                                             side effects)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Downloaded rows never create queue entries.

use chrono::{DateTime, Utc};
use minisuper_core::protocol::{ProductPayload, SalePayload};
use minisuper_core::{EntityType, Product, Sale, SaleItem, DEFAULT_UNIT};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::{cash_session, product, sale, sync_queue};

/// What a downloaded record did to the Local Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Skipped(String),
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, MergeOutcome::Skipped(_))
    }
}

/// Applies server results to the Local Store.
///
/// Obtained from [`Database::sync_store`](crate::Database::sync_store).
#[derive(Debug, Clone)]
pub struct SyncStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SyncStore {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        SyncStore { pool, write_lock }
    }

    // =========================================================================
    // Upload Outcomes
    // =========================================================================

    /// Removes the uploaded entries and records the server id.
    ///
    /// Returns true when the entity is fully synced, i.e. no entry for it
    /// was queued in the meantime.
    pub async fn acknowledge(
        &self,
        entity_type: EntityType,
        entity_local_id: &str,
        server_id: &str,
        entry_ids: &[String],
    ) -> DbResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for id in entry_ids {
            sync_queue::remove(&mut *tx, id).await?;
        }

        let remaining =
            sync_queue::remaining_for_entity(&mut *tx, entity_type, entity_local_id).await?;
        let fully_synced = remaining == 0;

        match entity_type {
            EntityType::Product => {
                product::mark_synced(&mut *tx, entity_local_id, server_id, fully_synced).await?
            }
            EntityType::Sale => {
                sale::mark_synced(&mut *tx, entity_local_id, server_id, fully_synced).await?
            }
            EntityType::CashSession => {
                cash_session::mark_synced(&mut *tx, entity_local_id, server_id, fully_synced)
                    .await?
            }
        }

        tx.commit().await?;

        debug!(
            entity_type = %entity_type,
            entity_local_id,
            server_id,
            fully_synced,
            "Acknowledged"
        );
        Ok(fully_synced)
    }

    /// Parks entries for manual resolution.
    pub async fn record_conflict(
        &self,
        entry_ids: &[String],
        reason: &str,
        server_data: Option<&str>,
    ) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for id in entry_ids {
            sync_queue::mark_conflict(&mut *tx, id, reason, server_data).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Counts a failed attempt against each entry.
    pub async fn record_failure(
        &self,
        entry_ids: &[String],
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for id in entry_ids {
            sync_queue::mark_failed(&mut *tx, id, error, next_attempt_at).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Moves entries to DEAD_LETTER.
    pub async fn dead_letter(&self, entry_ids: &[String], error: &str) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for id in entry_ids {
            sync_queue::dead_letter(&mut *tx, id, error).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Download Merge
    // =========================================================================

    /// Merges one server product into the local catalog.
    pub async fn apply_downloaded_product(
        &self,
        payload: &ProductPayload,
    ) -> DbResult<MergeOutcome> {
        let Some(server_id) = payload.server_id() else {
            return Ok(MergeOutcome::Skipped("missing server id".to_string()));
        };

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let outcome = match product::find_by_server_id(&mut *tx, server_id).await? {
            Some(local) if !local.synced => {
                MergeOutcome::Skipped("local copy has unsynced changes".to_string())
            }
            Some(local) => {
                let collision =
                    code_collision(&mut tx, payload, Some(local.local_id.as_str())).await?;
                if let Some(reason) = collision {
                    MergeOutcome::Skipped(reason)
                } else {
                    let merged =
                        product_from_payload(payload, server_id, local.local_id, local.created_at);
                    product::update(&mut *tx, &merged).await?;
                    MergeOutcome::Updated
                }
            }
            None => {
                if let Some(reason) = code_collision(&mut tx, payload, None).await? {
                    MergeOutcome::Skipped(reason)
                } else {
                    let fresh = product_from_payload(
                        payload,
                        server_id,
                        Uuid::new_v4().to_string(),
                        payload.last_modified,
                    );
                    product::insert(&mut *tx, &fresh).await?;
                    MergeOutcome::Inserted
                }
            }
        };

        tx.commit().await?;

        match &outcome {
            MergeOutcome::Skipped(reason) => {
                info!(code = %payload.code, server_id, reason = %reason, "Skipped downloaded product")
            }
            applied => debug!(code = %payload.code, server_id, outcome = ?applied, "Merged product"),
        }
        Ok(outcome)
    }

    /// Inserts a server sale unless it is already known locally.
    pub async fn apply_downloaded_sale(&self, payload: &SalePayload) -> DbResult<MergeOutcome> {
        let Some(server_id) = payload.server_id() else {
            return Ok(MergeOutcome::Skipped("missing server id".to_string()));
        };

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if sale::exists(&mut *tx, Some(server_id), &payload.sale_number).await? {
            return Ok(MergeOutcome::Skipped("already present".to_string()));
        }

        let local_id = Uuid::new_v4().to_string();
        let mut items = Vec::with_capacity(payload.items.len());
        for (position, item) in payload.items.iter().enumerate() {
            let local_product = match item.product_server_id() {
                Some(product_id) => product::find_by_server_id(&mut *tx, product_id).await?,
                None => None,
            };
            items.push(SaleItem {
                local_id: Uuid::new_v4().to_string(),
                sale_local_id: local_id.clone(),
                position: position as i64,
                product_local_id: local_product.map(|p| p.local_id),
                product_id: item.product_server_id().map(str::to_string),
                product_code: item.product_code.clone(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price,
                discount_cents: item.discount,
                subtotal_cents: item.subtotal,
            });
        }

        let now = Utc::now();
        let downloaded = Sale {
            local_id,
            server_id: Some(server_id.to_string()),
            sale_number: payload.sale_number.clone(),
            date: payload.date,
            subtotal_cents: payload.subtotal,
            tax_cents: payload.tax,
            discount_cents: payload.discount,
            total_cents: payload.total,
            payment_method: payload.payment_method,
            user_id: payload.user_id.clone(),
            customer_id: payload.customer_id.clone(),
            cash_session_id: None,
            notes: payload.notes.clone(),
            status: payload.status,
            items,
            created_at: now,
            last_modified: payload.last_modified,
            synced: true,
            pending_action: None,
        };

        sale::insert(&mut tx, &downloaded).await?;
        tx.commit().await?;

        debug!(sale_number = %downloaded.sale_number, server_id, "Merged sale");
        Ok(MergeOutcome::Inserted)
    }
}

/// Reason to skip when an active local product other than `own_local_id`
/// already uses the payload's code.
async fn code_collision(
    conn: &mut SqliteConnection,
    payload: &ProductPayload,
    own_local_id: Option<&str>,
) -> DbResult<Option<String>> {
    if !payload.active {
        return Ok(None);
    }
    let holder = product::find_active_by_code(&mut *conn, &payload.code).await?;
    Ok(holder
        .filter(|p| Some(p.local_id.as_str()) != own_local_id)
        .map(|p| format!("code {} already used by local product {}", payload.code, p.local_id)))
}

fn product_from_payload(
    payload: &ProductPayload,
    server_id: &str,
    local_id: String,
    created_at: DateTime<Utc>,
) -> Product {
    Product {
        local_id,
        server_id: Some(server_id.to_string()),
        name: payload.name.clone(),
        code: payload.code.clone(),
        barcode: payload.barcode.clone(),
        price_cents: payload.price,
        cost_cents: payload.cost,
        stock: payload.stock,
        min_stock: payload.min_stock,
        max_stock: payload.max_stock,
        category: payload.category.clone(),
        brand: payload.brand.clone(),
        description: payload.description.clone(),
        unit: if payload.unit.is_empty() {
            DEFAULT_UNIT.to_string()
        } else {
            payload.unit.clone()
        },
        image: payload.image.clone(),
        active: payload.active,
        synced: true,
        pending_action: None,
        created_at,
        last_modified: payload.last_modified,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use minisuper_core::protocol::SaleItemPayload;
    use minisuper_core::{
        NewProduct, NewSale, NewSaleItem, PaymentMethod, QueueStatus, SaleStatus, SyncAction,
    };

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn server_product(id: &str, code: &str, stock: i64) -> ProductPayload {
        ProductPayload {
            id: id.to_string(),
            local_id: String::new(),
            name: format!("Producto {}", code),
            code: code.to_string(),
            barcode: None,
            price: 250,
            cost: 180,
            stock,
            min_stock: 10,
            max_stock: None,
            category: Some("Bebidas".to_string()),
            brand: None,
            description: None,
            unit: "unidad".to_string(),
            image: None,
            active: true,
            last_modified: Utc::now(),
            action: SyncAction::Update,
        }
    }

    #[tokio::test]
    async fn test_acknowledge_removes_entries_and_marks_synced() {
        let db = setup().await;
        let product = db
            .recorder()
            .create_product(NewProduct {
                name: "Agua 1L".to_string(),
                code: "BEB010".to_string(),
                price_cents: 100,
                stock: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        let entries = db
            .sync_queue()
            .for_entity(EntityType::Product, &product.local_id)
            .await
            .unwrap();
        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();

        let fully = db
            .sync_store()
            .acknowledge(EntityType::Product, &product.local_id, "srv-p-1", &ids)
            .await
            .unwrap();
        assert!(fully);

        let stored = db.products().get(&product.local_id).await.unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.server_id.as_deref(), Some("srv-p-1"));
        assert_eq!(stored.pending_action, None);
        assert_eq!(db.sync_queue().counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_unsynced_when_newer_entry_queued() {
        let db = setup().await;
        let product = db
            .recorder()
            .create_product(NewProduct {
                name: "Agua 1L".to_string(),
                code: "BEB010".to_string(),
                price_cents: 100,
                stock: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let uploaded: Vec<String> = db
            .sync_queue()
            .for_entity(EntityType::Product, &product.local_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();

        // Edited while the upload was in flight
        db.recorder().adjust_stock(&product.local_id, 5).await.unwrap();

        let fully = db
            .sync_store()
            .acknowledge(EntityType::Product, &product.local_id, "srv-p-1", &uploaded)
            .await
            .unwrap();
        assert!(!fully);

        let stored = db.products().get(&product.local_id).await.unwrap().unwrap();
        assert!(!stored.synced);
        assert_eq!(stored.server_id.as_deref(), Some("srv-p-1"));
        assert_eq!(db.sync_queue().counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_conflict_blocks_entity_until_discarded() {
        let db = setup().await;
        let product = db
            .recorder()
            .create_product(NewProduct {
                name: "Agua 1L".to_string(),
                code: "BEB010".to_string(),
                price_cents: 100,
                stock: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let entry = db
            .sync_queue()
            .for_entity(EntityType::Product, &product.local_id)
            .await
            .unwrap()
            .remove(0);

        db.sync_store()
            .record_conflict(&[entry.id.clone()], "Product code already exists", Some("{}"))
            .await
            .unwrap();
        db.recorder().adjust_stock(&product.local_id, 1).await.unwrap();

        assert!(db.sync_queue().pending(100, Utc::now()).await.unwrap().is_empty());
        let conflicts = db.sync_queue().conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].status, QueueStatus::Conflict);
        assert_eq!(
            conflicts[0].conflict_reason.as_deref(),
            Some("Product code already exists")
        );

        assert!(db.sync_queue().discard_conflict(&entry.id).await.unwrap());
        assert_eq!(db.sync_queue().pending(100, Utc::now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_backoff_hides_entry_until_due() {
        let db = setup().await;
        let product = db
            .recorder()
            .create_product(NewProduct {
                name: "Agua 1L".to_string(),
                code: "BEB010".to_string(),
                price_cents: 100,
                stock: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let entry = db
            .sync_queue()
            .for_entity(EntityType::Product, &product.local_id)
            .await
            .unwrap()
            .remove(0);

        let now = Utc::now();
        let retry_at = now + chrono::Duration::seconds(30);
        db.sync_store()
            .record_failure(&[entry.id.clone()], "connection refused", retry_at)
            .await
            .unwrap();

        assert!(db.sync_queue().pending(100, now).await.unwrap().is_empty());
        assert_eq!(db.sync_queue().backing_off(now).await.unwrap().len(), 1);
        assert!(db
            .sync_queue()
            .backing_off(retry_at + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .is_empty());
        let due = db
            .sync_queue()
            .pending(100, retry_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
        assert_eq!(due[0].last_error.as_deref(), Some("connection refused"));

        db.sync_store()
            .dead_letter(&[entry.id.clone()], "gave up")
            .await
            .unwrap();
        assert_eq!(db.sync_queue().counts().await.unwrap().dead_letters, 1);
        assert_eq!(db.sync_queue().requeue_dead_letters().await.unwrap(), 1);
        assert_eq!(db.sync_queue().pending(100, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_downloaded_product_inserted_then_updated() {
        let db = setup().await;
        let store = db.sync_store();

        let outcome = store
            .apply_downloaded_product(&server_product("srv-1", "SNK001", 20))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Inserted);

        let outcome = store
            .apply_downloaded_product(&server_product("srv-1", "SNK001", 15))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Updated);

        let stored = db.products().get_by_server_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.stock, 15);
        assert!(stored.synced);
        // Downloads never queue anything
        assert_eq!(db.sync_queue().counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_downloaded_product_skips_unsynced_local_copy() {
        let db = setup().await;
        db.sync_store()
            .apply_downloaded_product(&server_product("srv-1", "SNK001", 20))
            .await
            .unwrap();
        let local = db.products().get_by_server_id("srv-1").await.unwrap().unwrap();
        db.recorder().adjust_stock(&local.local_id, -2).await.unwrap();

        let outcome = db
            .sync_store()
            .apply_downloaded_product(&server_product("srv-1", "SNK001", 50))
            .await
            .unwrap();
        assert!(!outcome.is_applied());

        let stored = db.products().get(&local.local_id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 18);
    }

    #[tokio::test]
    async fn test_downloaded_product_skips_code_collision() {
        let db = setup().await;
        db.recorder()
            .create_product(NewProduct {
                name: "Papas locales".to_string(),
                code: "SNK001".to_string(),
                price_cents: 150,
                stock: 5,
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = db
            .sync_store()
            .apply_downloaded_product(&server_product("srv-9", "SNK001", 20))
            .await
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Skipped(_)));
        assert!(db.products().get_by_server_id("srv-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_downloaded_sale_inserted_once_and_linked() {
        let db = setup().await;
        db.sync_store()
            .apply_downloaded_product(&server_product("srv-1", "SNK001", 20))
            .await
            .unwrap();

        let payload = SalePayload {
            id: "srv-s-1".to_string(),
            local_id: String::new(),
            sale_number: "202401150001".to_string(),
            date: Utc::now(),
            subtotal: 500,
            tax: 60,
            discount: 0,
            total: 560,
            payment_method: PaymentMethod::Card,
            user_id: "cashier-2".to_string(),
            customer_id: None,
            cash_session_local_id: None,
            notes: None,
            status: SaleStatus::Completed,
            items: vec![SaleItemPayload {
                product_id: "srv-1".to_string(),
                product_local_id: None,
                product_code: "SNK001".to_string(),
                product_name: "Producto SNK001".to_string(),
                quantity: 2,
                unit_price: 250,
                discount: 0,
                subtotal: 500,
            }],
            last_modified: Utc::now(),
            action: SyncAction::Create,
        };

        assert_eq!(
            db.sync_store().apply_downloaded_sale(&payload).await.unwrap(),
            MergeOutcome::Inserted
        );
        assert!(!db
            .sync_store()
            .apply_downloaded_sale(&payload)
            .await
            .unwrap()
            .is_applied());

        let stored = db
            .sales()
            .get_by_server_id("srv-s-1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.synced);
        assert_eq!(stored.items.len(), 1);
        assert!(stored.items[0].product_local_id.is_some());

        // Stock untouched by downloaded sales
        let product = db.products().get_by_server_id("srv-1").await.unwrap().unwrap();
        assert_eq!(product.stock, 20);
    }

    #[tokio::test]
    async fn test_downloaded_sale_number_does_not_disturb_local_sequence() {
        let db = setup().await;
        let product = db
            .recorder()
            .create_product(NewProduct {
                name: "Agua 1L".to_string(),
                code: "BEB010".to_string(),
                price_cents: 100,
                stock: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let sale = db
            .recorder()
            .create_sale(NewSale {
                user_id: "cashier-1".to_string(),
                customer_id: None,
                payment_method: PaymentMethod::Cash,
                discount_cents: 0,
                notes: None,
                items: vec![NewSaleItem {
                    product_local_id: product.local_id.clone(),
                    quantity: 1,
                    unit_price_cents: None,
                    discount_cents: 0,
                }],
                expected_total_cents: None,
            })
            .await
            .unwrap();

        // Same sale echoed back by the server
        let mut echoed = SalePayload::from_sale(&sale, SyncAction::Create);
        echoed.id = "srv-s-7".to_string();
        let outcome = db.sync_store().apply_downloaded_sale(&echoed).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::Skipped(_)));
        assert_eq!(db.sales().list(&Default::default()).await.unwrap().len(), 1);
    }
}
