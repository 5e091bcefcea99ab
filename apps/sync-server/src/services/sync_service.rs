//! Sync service.
//!
//! Applies uploaded items one at a time, each in its own transaction, and
//! serves download deltas.
//!
//! ## Upload Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CREATE  natural key taken (product code, sale number)  → conflict      │
//! │          same key from the same register (replay)       → applied       │
//! │  UPDATE  record missing                                 → conflict      │
//! │          server updated_at > client lastModified, and   → conflict      │
//! │          another writer touched it since                  (both sides)  │
//! │  DELETE  soft delete (active = 0)                                       │
//! │                                                                         │
//! │  Sale CREATE (COMPLETED)  → stock -= qty, floored at 0                 │
//! │  Sale UPDATE → CANCELLED/REFUNDED from COMPLETED → stock += qty        │
//! │                                                                         │
//! │  Any other error fails only that item.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Items are applied in request order: products, then sales, then cash
//! sessions. Registers never put a product snapshot after a sale of that
//! product in the same request, so this matches the order the changes
//! happened in.
//!
//! Every write is noted against its writer (the request's `registerId`, or
//! the caller's user id). Writes a register made itself never make its own
//! later uploads stale.

use chrono::{DateTime, Utc};
use minisuper_core::protocol::{
    reasons, CashSessionPayload, ConflictItem, DownloadData, DownloadQuery, DownloadResponse,
    DownloadStatistics, EntityResults, ProductPayload, SalePayload, UploadRequest,
    UploadResponse, UploadResults,
};
use minisuper_core::{EntityType, SaleStatus, SyncAction};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::db::{self, ProductRecord, ServerDatabase};
use crate::error::ServerResult;

/// Result of applying one uploaded item.
#[derive(Debug)]
enum ItemOutcome {
    Applied(String),
    Conflict(ConflictItem),
    Failed(String),
}

/// Sync service implementation.
#[derive(Debug, Clone)]
pub struct SyncService {
    db: ServerDatabase,
}

impl SyncService {
    pub fn new(db: ServerDatabase) -> Self {
        SyncService { db }
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Applies every item; failures and conflicts never abort the request.
    pub async fn upload(&self, user: &Claims, request: &UploadRequest) -> UploadResponse {
        let writer = writer_id(user, request);

        info!(
            user_id = %user.user_id,
            writer = %writer,
            products = request.products.len(),
            sales = request.sales.len(),
            cash_sessions = request.cash_sessions.len(),
            "Processing upload"
        );

        let mut results = UploadResults::default();
        for p in &request.products {
            let outcome = self.apply_product(p, &writer).await;
            record(&mut results.products, &p.local_id, outcome);
        }
        for s in &request.sales {
            let outcome = self.apply_sale(s, &writer).await;
            record(&mut results.sales, &s.local_id, outcome);
        }
        for c in &request.cash_sessions {
            let outcome = self.apply_cash_session(c, &writer).await;
            record(&mut results.cash_sessions, &c.local_id, outcome);
        }

        UploadResponse {
            success: true,
            results,
            sync_timestamp: Utc::now(),
        }
    }

    async fn apply_product(&self, p: &ProductPayload, writer: &str) -> ServerResult<ItemOutcome> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let outcome = match p.action {
            SyncAction::Create => match db::find_product_by_code(&mut *tx, &p.code).await? {
                Some(existing) if is_replay(existing.local_id.as_deref(), &p.local_id) => {
                    ItemOutcome::Applied(existing.id)
                }
                Some(existing) => natural_key_conflict(
                    &p.local_id,
                    existing.id,
                    reasons::PRODUCT_CODE_EXISTS,
                    p,
                ),
                None => {
                    let id = Uuid::new_v4().to_string();
                    db::insert_product(&mut *tx, &id, p, now).await?;
                    db::record_write(&mut *tx, EntityType::Product, &id, writer, now).await?;
                    ItemOutcome::Applied(id)
                }
            },
            SyncAction::Update | SyncAction::Delete => {
                match resolve_product(&mut tx, p).await? {
                    None => not_found(&p.local_id, reasons::PRODUCT_NOT_FOUND),
                    Some(existing) => change_product(&mut tx, existing, p, writer, now).await?,
                }
            }
        };

        tx.commit().await?;
        debug!(code = %p.code, action = %p.action, outcome = ?outcome, "Product processed");
        Ok(outcome)
    }

    async fn apply_sale(&self, s: &SalePayload, writer: &str) -> ServerResult<ItemOutcome> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let outcome = match s.action {
            SyncAction::Create => self.create_sale(&mut tx, s, writer, now).await?,
            SyncAction::Update | SyncAction::Delete => {
                self.update_sale(&mut tx, s, writer, now).await?
            }
        };

        // Failed items leave nothing behind.
        if matches!(outcome, ItemOutcome::Failed(_)) {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        debug!(sale_number = %s.sale_number, action = %s.action, outcome = ?outcome, "Sale processed");
        Ok(outcome)
    }

    async fn create_sale(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        s: &SalePayload,
        writer: &str,
        now: DateTime<Utc>,
    ) -> ServerResult<ItemOutcome> {
        if let Some(existing) = db::find_sale_by_number(&mut **tx, &s.sale_number).await? {
            if is_replay(existing.local_id.as_deref(), &s.local_id) {
                return Ok(ItemOutcome::Applied(existing.id));
            }
            return Ok(natural_key_conflict(
                &s.local_id,
                existing.id,
                reasons::SALE_NUMBER_EXISTS,
                s,
            ));
        }

        let mut product_ids = Vec::with_capacity(s.items.len());
        for item in &s.items {
            let by_id = match item.product_server_id() {
                Some(id) => db::find_product(&mut **tx, id).await?,
                None => None,
            };
            let product = match by_id {
                Some(product) => Some(product),
                None => db::find_product_by_code(&mut **tx, &item.product_code).await?,
            };
            match product {
                Some(product) => product_ids.push(product.id),
                None => {
                    return Ok(ItemOutcome::Failed(format!(
                        "Product {} not found on server",
                        item.product_code
                    )))
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        db::insert_sale(&mut **tx, &id, s, now).await?;
        db::record_write(&mut **tx, EntityType::Sale, &id, writer, now).await?;
        for (item, product_id) in s.items.iter().zip(&product_ids) {
            db::insert_sale_item(&mut **tx, &id, product_id, item).await?;
            if s.status == SaleStatus::Completed {
                db::adjust_stock(&mut **tx, product_id, -item.quantity, now).await?;
                db::record_write(&mut **tx, EntityType::Product, product_id, writer, now).await?;
            }
        }

        Ok(ItemOutcome::Applied(id))
    }

    async fn update_sale(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        s: &SalePayload,
        writer: &str,
        now: DateTime<Utc>,
    ) -> ServerResult<ItemOutcome> {
        let by_id = match s.server_id() {
            Some(id) => db::find_sale(&mut **tx, id).await?,
            None => None,
        };
        let existing = match by_id {
            Some(sale) => sale,
            None => match db::find_sale_by_number(&mut **tx, &s.sale_number).await? {
                Some(sale) => sale,
                None => return Ok(not_found(&s.local_id, reasons::SALE_NOT_FOUND)),
            },
        };

        if is_stale(tx, EntityType::Sale, &existing.id, existing.updated_at, s.last_modified, writer)
            .await?
        {
            let items = db::sale_items(&mut **tx, &existing.id).await?;
            return Ok(stale_conflict(
                &s.local_id,
                existing.id.clone(),
                &existing.to_payload(&items, SyncAction::Update),
                s,
            ));
        }

        if existing.status != s.status {
            if !existing.status.can_transition_to(s.status) {
                return Ok(ItemOutcome::Conflict(ConflictItem {
                    local_id: s.local_id.clone(),
                    server_id: Some(existing.id),
                    reason: reasons::SALE_STATUS_TRANSITION.to_string(),
                    data: serde_json::to_value(s).ok(),
                    server_data: None,
                    client_data: None,
                }));
            }

            let delta_sign = if existing.status == SaleStatus::Completed && s.status.restores_stock() {
                1
            } else if existing.status == SaleStatus::Pending && s.status == SaleStatus::Completed {
                -1
            } else {
                0
            };
            if delta_sign != 0 {
                for item in db::sale_items(&mut **tx, &existing.id).await? {
                    if let Some(product_id) = &item.product_id {
                        db::adjust_stock(&mut **tx, product_id, delta_sign * item.quantity, now)
                            .await?;
                        db::record_write(&mut **tx, EntityType::Product, product_id, writer, now)
                            .await?;
                    }
                }
            }
        }

        db::update_sale_status(
            &mut **tx,
            &existing.id,
            s.status,
            s.notes.as_deref(),
            s.last_modified,
            now,
        )
        .await?;
        db::record_write(&mut **tx, EntityType::Sale, &existing.id, writer, now).await?;
        Ok(ItemOutcome::Applied(existing.id))
    }

    async fn apply_cash_session(
        &self,
        c: &CashSessionPayload,
        writer: &str,
    ) -> ServerResult<ItemOutcome> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await?;

        let by_id = match c.server_id() {
            Some(id) => db::find_cash_session(&mut *tx, id).await?,
            None => None,
        };
        let existing = match by_id {
            Some(session) => Some(session),
            None if !c.local_id.is_empty() => {
                db::find_cash_session_by_local_id(&mut *tx, &c.local_id).await?
            }
            None => None,
        };

        let outcome = match (c.action, existing) {
            (SyncAction::Create, Some(existing)) => ItemOutcome::Applied(existing.id),
            (SyncAction::Create, None) => {
                let id = Uuid::new_v4().to_string();
                db::insert_cash_session(&mut *tx, &id, c, now).await?;
                db::record_write(&mut *tx, EntityType::CashSession, &id, writer, now).await?;
                ItemOutcome::Applied(id)
            }
            (SyncAction::Delete, _) => {
                ItemOutcome::Failed("cash sessions cannot be deleted".to_string())
            }
            (SyncAction::Update, None) => not_found(&c.local_id, reasons::CASH_SESSION_NOT_FOUND),
            (SyncAction::Update, Some(existing)) => {
                let stale = is_stale(
                    &mut tx,
                    EntityType::CashSession,
                    &existing.id,
                    existing.updated_at,
                    c.last_modified,
                    writer,
                )
                .await?;
                if stale {
                    ItemOutcome::Conflict(ConflictItem {
                        local_id: c.local_id.clone(),
                        server_id: Some(existing.id.clone()),
                        reason: reasons::SERVER_NEWER.to_string(),
                        data: None,
                        server_data: Some(serde_json::json!({
                            "id": existing.id,
                            "status": existing.status,
                            "endAmount": existing.end_amount,
                            "totalSales": existing.total_sales,
                            "lastModified": existing.updated_at,
                        })),
                        client_data: serde_json::to_value(c).ok(),
                    })
                } else {
                    db::update_cash_session(&mut *tx, &existing.id, c, now).await?;
                    db::record_write(&mut *tx, EntityType::CashSession, &existing.id, writer, now)
                        .await?;
                    ItemOutcome::Applied(existing.id)
                }
            }
        };

        tx.commit().await?;
        debug!(local_id = %c.local_id, action = %c.action, outcome = ?outcome, "Cash session processed");
        Ok(outcome)
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Records written since the caller's checkpoint.
    pub async fn download(&self, user: &Claims, query: &DownloadQuery) -> ServerResult<DownloadResponse> {
        // Taken before reading so nothing written meanwhile is skipped next time.
        let now = Utc::now();
        let since = query.last_sync_timestamp;

        let products = if query.include_products {
            self.db
                .products_changed_since(since)
                .await?
                .iter()
                .map(|p| p.to_payload(product_action(p)))
                .collect()
        } else {
            Vec::new()
        };

        let sales = if query.include_sales {
            let owner = query.include_own_sales_only.then_some(user.user_id.as_str());
            self.db
                .sales_changed_since(since, owner)
                .await?
                .iter()
                .map(|(sale, items)| sale.to_payload(items, SyncAction::Create))
                .collect()
        } else {
            Vec::new()
        };

        let statistics = DownloadStatistics {
            products_count: products.len(),
            sales_count: sales.len(),
            last_sync_timestamp: since,
            new_sync_timestamp: now,
        };

        info!(
            user_id = %user.user_id,
            products = statistics.products_count,
            sales = statistics.sales_count,
            "Serving download"
        );

        Ok(DownloadResponse {
            success: true,
            data: DownloadData {
                products,
                sales,
                sync_timestamp: now,
            },
            statistics,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn record(results: &mut EntityResults, local_id: &str, outcome: ServerResult<ItemOutcome>) {
    match outcome.unwrap_or_else(|e| ItemOutcome::Failed(e.to_string())) {
        ItemOutcome::Applied(server_id) => results.record_applied(local_id, &server_id),
        ItemOutcome::Conflict(conflict) => {
            debug!(local_id, reason = %conflict.reason, "Upload conflict");
            results.record_conflict(conflict);
        }
        ItemOutcome::Failed(error) => {
            warn!(local_id, error = %error, "Upload item failed");
            results.record_failed(local_id, error);
        }
    }
}

/// Who the writes of one upload are attributed to.
fn writer_id(user: &Claims, request: &UploadRequest) -> String {
    match request.register_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("user:{}", user.user_id),
    }
}

/// The server wrote the record after the client's edit, and not only on
/// behalf of the uploader. Records with no noted writes count as stale.
async fn is_stale(
    tx: &mut Transaction<'_, Sqlite>,
    entity_type: EntityType,
    entity_id: &str,
    updated_at: DateTime<Utc>,
    client_modified: DateTime<Utc>,
    writer: &str,
) -> ServerResult<bool> {
    if updated_at <= client_modified {
        return Ok(false);
    }
    let writes = db::record_writes(&mut **tx, entity_type, entity_id).await?;
    Ok(writes.is_empty()
        || writes
            .iter()
            .any(|w| w.writer != writer && w.written_at > client_modified))
}

/// UPDATE or DELETE of a product the server knows.
async fn change_product(
    tx: &mut Transaction<'_, Sqlite>,
    existing: ProductRecord,
    p: &ProductPayload,
    writer: &str,
    now: DateTime<Utc>,
) -> ServerResult<ItemOutcome> {
    if is_stale(tx, EntityType::Product, &existing.id, existing.updated_at, p.last_modified, writer)
        .await?
    {
        return Ok(stale_conflict(
            &p.local_id,
            existing.id.clone(),
            &existing.to_payload(SyncAction::Update),
            p,
        ));
    }

    if p.action == SyncAction::Delete {
        db::deactivate_product(&mut **tx, &existing.id, p.last_modified, now).await?;
    } else {
        if let Some(other) = db::find_product_by_code(&mut **tx, &p.code).await? {
            if other.id != existing.id {
                return Ok(natural_key_conflict(
                    &p.local_id,
                    other.id,
                    reasons::PRODUCT_CODE_EXISTS,
                    p,
                ));
            }
        }
        db::update_product(&mut **tx, &existing.id, p, now).await?;
    }
    db::record_write(&mut **tx, EntityType::Product, &existing.id, writer, now).await?;
    Ok(ItemOutcome::Applied(existing.id))
}

/// The same register re-sending a create the server already applied.
fn is_replay(existing_local_id: Option<&str>, local_id: &str) -> bool {
    !local_id.is_empty() && existing_local_id == Some(local_id)
}

async fn resolve_product(
    tx: &mut Transaction<'_, Sqlite>,
    p: &ProductPayload,
) -> ServerResult<Option<ProductRecord>> {
    if let Some(id) = p.server_id() {
        if let Some(product) = db::find_product(&mut **tx, id).await? {
            return Ok(Some(product));
        }
    }
    if !p.local_id.is_empty() {
        if let Some(product) = db::find_product_by_local_id(&mut **tx, &p.local_id).await? {
            return Ok(Some(product));
        }
    }
    db::find_product_by_code(&mut **tx, &p.code).await
}

fn product_action(product: &ProductRecord) -> SyncAction {
    if product.active {
        SyncAction::Update
    } else {
        SyncAction::Delete
    }
}

fn natural_key_conflict<T: Serialize>(
    local_id: &str,
    server_id: String,
    reason: &str,
    client: &T,
) -> ItemOutcome {
    ItemOutcome::Conflict(ConflictItem {
        local_id: local_id.to_string(),
        server_id: Some(server_id),
        reason: reason.to_string(),
        data: serde_json::to_value(client).ok(),
        server_data: None,
        client_data: None,
    })
}

fn stale_conflict<S: Serialize, C: Serialize>(
    local_id: &str,
    server_id: String,
    server: &S,
    client: &C,
) -> ItemOutcome {
    ItemOutcome::Conflict(ConflictItem {
        local_id: local_id.to_string(),
        server_id: Some(server_id),
        reason: reasons::SERVER_NEWER.to_string(),
        data: None,
        server_data: serde_json::to_value(server).ok(),
        client_data: serde_json::to_value(client).ok(),
    })
}

fn not_found(local_id: &str, reason: &str) -> ItemOutcome {
    ItemOutcome::Conflict(ConflictItem {
        local_id: local_id.to_string(),
        server_id: None,
        reason: reason.to_string(),
        data: None,
        server_data: None,
        client_data: None,
    })
}
