//! # Sync Wire Protocol
//!
//! JSON bodies exchanged between the Sync Manager and the server of record.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /sync/upload                                                      │
//! │    { products:[..], sales:[..], cashSessions:[..], lastSyncTimestamp }  │
//! │    ◄── { success, results:{products,sales,cashSessions}, syncTimestamp }│
//! │                                                                         │
//! │  GET /sync/download?lastSyncTimestamp&includeProducts&includeSales      │
//! │                    &includeOwnSalesOnly                                 │
//! │    ◄── { success, data:{products,sales,syncTimestamp}, statistics }     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every payload item carries the server `id` (empty string until one is
//! assigned), the client `localId`, the full field set, `lastModified` as
//! RFC 3339 and the pending `action`. Money fields are integer cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    CashSession, CashSessionStatus, PaymentMethod, Product, Sale, SaleItem, SaleStatus,
    SyncAction,
};

/// Conflict reasons reported by the server.
pub mod reasons {
    pub const PRODUCT_CODE_EXISTS: &str = "Product code already exists";
    pub const SERVER_NEWER: &str = "Server version is newer";
    pub const PRODUCT_NOT_FOUND: &str = "Product not found on server";
    pub const SALE_NUMBER_EXISTS: &str = "Sale number already exists";
    pub const SALE_NOT_FOUND: &str = "Sale not found on server";
    pub const CASH_SESSION_NOT_FOUND: &str = "Cash session not found on server";
    pub const SALE_STATUS_TRANSITION: &str = "Sale status change not allowed";
}

/// Maps an optional server id to the wire form (empty string when unset).
fn wire_id(server_id: &Option<String>) -> String {
    server_id.clone().unwrap_or_default()
}

/// Maps a wire id back (empty string means unassigned).
fn optional_id(id: &str) -> Option<&str> {
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

// =============================================================================
// Entity Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub barcode: Option<String>,
    pub price: i64,
    #[serde(default)]
    pub cost: i64,
    pub stock: i64,
    #[serde(default)]
    pub min_stock: i64,
    #[serde(default)]
    pub max_stock: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub action: SyncAction,
}

fn default_unit() -> String {
    crate::DEFAULT_UNIT.to_string()
}

fn default_true() -> bool {
    true
}

impl ProductPayload {
    /// Full snapshot of a local product with the action to replay.
    pub fn from_product(product: &Product, action: SyncAction) -> Self {
        ProductPayload {
            id: wire_id(&product.server_id),
            local_id: product.local_id.clone(),
            name: product.name.clone(),
            code: product.code.clone(),
            barcode: product.barcode.clone(),
            price: product.price_cents,
            cost: product.cost_cents,
            stock: product.stock,
            min_stock: product.min_stock,
            max_stock: product.max_stock,
            category: product.category.clone(),
            brand: product.brand.clone(),
            description: product.description.clone(),
            unit: product.unit.clone(),
            image: product.image.clone(),
            active: product.active,
            last_modified: product.last_modified,
            action,
        }
    }

    /// Server id, if assigned.
    pub fn server_id(&self) -> Option<&str> {
        optional_id(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItemPayload {
    /// Server id of the product, empty when it had none at sale time.
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub product_local_id: Option<String>,
    pub product_code: String,
    #[serde(default)]
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: i64,
    #[serde(default)]
    pub discount: i64,
    pub subtotal: i64,
}

impl From<&SaleItem> for SaleItemPayload {
    fn from(item: &SaleItem) -> Self {
        SaleItemPayload {
            product_id: wire_id(&item.product_id),
            product_local_id: item.product_local_id.clone(),
            product_code: item.product_code.clone(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price_cents,
            discount: item.discount_cents,
            subtotal: item.subtotal_cents,
        }
    }
}

impl SaleItemPayload {
    pub fn product_server_id(&self) -> Option<&str> {
        optional_id(&self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalePayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    pub sale_number: String,
    pub date: DateTime<Utc>,
    pub subtotal: i64,
    pub tax: i64,
    #[serde(default)]
    pub discount: i64,
    pub total: i64,
    pub payment_method: PaymentMethod,
    pub user_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Client-side cash session id.
    #[serde(default)]
    pub cash_session_local_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: SaleStatus,
    pub items: Vec<SaleItemPayload>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub action: SyncAction,
}

impl SalePayload {
    /// Full snapshot of a local sale (items included).
    pub fn from_sale(sale: &Sale, action: SyncAction) -> Self {
        SalePayload {
            id: wire_id(&sale.server_id),
            local_id: sale.local_id.clone(),
            sale_number: sale.sale_number.clone(),
            date: sale.date,
            subtotal: sale.subtotal_cents,
            tax: sale.tax_cents,
            discount: sale.discount_cents,
            total: sale.total_cents,
            payment_method: sale.payment_method,
            user_id: sale.user_id.clone(),
            customer_id: sale.customer_id.clone(),
            cash_session_local_id: sale.cash_session_id.clone(),
            notes: sale.notes.clone(),
            status: sale.status,
            items: sale.items.iter().map(SaleItemPayload::from).collect(),
            last_modified: sale.last_modified,
            action,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        optional_id(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashSessionPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    pub user_id: String,
    pub start_amount: i64,
    #[serde(default)]
    pub end_amount: Option<i64>,
    #[serde(default)]
    pub total_sales: i64,
    pub status: CashSessionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub action: SyncAction,
}

impl CashSessionPayload {
    pub fn from_session(session: &CashSession, action: SyncAction) -> Self {
        CashSessionPayload {
            id: wire_id(&session.server_id),
            local_id: session.local_id.clone(),
            user_id: session.user_id.clone(),
            start_amount: session.start_amount_cents,
            end_amount: session.end_amount_cents,
            total_sales: session.total_sales_cents,
            status: session.status,
            opened_at: session.opened_at,
            closed_at: session.closed_at,
            notes: session.notes.clone(),
            last_modified: session.last_modified,
            action,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        optional_id(&self.id)
    }
}

// =============================================================================
// Upload
// =============================================================================

/// One upload batch. The server applies products, then sales, then cash
/// sessions, each array in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Stable id of the uploading register. Writes a register made itself
    /// never make its later edits stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_id: Option<String>,
    #[serde(default)]
    pub products: Vec<ProductPayload>,
    #[serde(default)]
    pub sales: Vec<SalePayload>,
    #[serde(default)]
    pub cash_sessions: Vec<CashSessionPayload>,
    #[serde(default)]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl UploadRequest {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.sales.is_empty() && self.cash_sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.products.len() + self.sales.len() + self.cash_sessions.len()
    }
}

/// An item the server applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedItem {
    pub local_id: String,
    pub server_id: String,
}

/// An item the server failed to apply (retryable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub local_id: String,
    pub error: String,
}

/// An item rejected because the server state diverged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictItem {
    pub local_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub reason: String,
    /// The client item, for natural-key conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Both versions, for stale-write conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_data: Option<Value>,
}

/// Per-entity-type upload results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityResults {
    #[serde(default)]
    pub processed: u32,
    #[serde(default)]
    pub errors: u32,
    #[serde(default)]
    pub conflicts: Vec<ConflictItem>,
    #[serde(default)]
    pub applied: Vec<AppliedItem>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
}

impl EntityResults {
    pub fn record_applied(&mut self, local_id: &str, server_id: &str) {
        self.processed += 1;
        self.applied.push(AppliedItem {
            local_id: local_id.to_string(),
            server_id: server_id.to_string(),
        });
    }

    pub fn record_failed(&mut self, local_id: &str, error: impl Into<String>) {
        self.errors += 1;
        self.failed.push(FailedItem {
            local_id: local_id.to_string(),
            error: error.into(),
        });
    }

    pub fn record_conflict(&mut self, conflict: ConflictItem) {
        self.conflicts.push(conflict);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResults {
    #[serde(default)]
    pub products: EntityResults,
    #[serde(default)]
    pub sales: EntityResults,
    #[serde(default)]
    pub cash_sessions: EntityResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub results: UploadResults,
    pub sync_timestamp: DateTime<Utc>,
}

// =============================================================================
// Download
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub include_products: bool,
    #[serde(default = "default_true")]
    pub include_sales: bool,
    #[serde(default)]
    pub include_own_sales_only: bool,
}

impl Default for DownloadQuery {
    fn default() -> Self {
        DownloadQuery {
            last_sync_timestamp: None,
            include_products: true,
            include_sales: true,
            include_own_sales_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadData {
    #[serde(default)]
    pub products: Vec<ProductPayload>,
    #[serde(default)]
    pub sales: Vec<SalePayload>,
    pub sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatistics {
    pub products_count: usize,
    pub sales_count: usize,
    #[serde(default)]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub new_sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub success: bool,
    pub data: DownloadData,
    pub statistics: DownloadStatistics,
}

/// Error body returned by the server (`{ success: false, error }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_request_wire_shape() {
        let now = Utc::now();
        let request = UploadRequest {
            products: vec![ProductPayload {
                id: String::new(),
                local_id: "local-1".to_string(),
                name: "Coca Cola 500ml".to_string(),
                code: "BEB001".to_string(),
                barcode: None,
                price: 250,
                cost: 180,
                stock: 45,
                min_stock: 10,
                max_stock: None,
                category: Some("Bebidas".to_string()),
                brand: None,
                description: None,
                unit: "unidad".to_string(),
                image: None,
                active: true,
                last_modified: now,
                action: SyncAction::Create,
            }],
            ..Default::default()
        };

        let value = serde_json::to_value(&request).unwrap();
        let product = &value["products"][0];
        assert_eq!(product["id"], json!(""));
        assert_eq!(product["localId"], json!("local-1"));
        assert_eq!(product["minStock"], json!(10));
        assert_eq!(product["action"], json!("CREATE"));
        assert!(product["lastModified"].is_string());
        assert_eq!(value["cashSessions"], json!([]));
        assert!(value.get("registerId").is_none());
        assert_eq!(request.products[0].server_id(), None);
    }

    #[test]
    fn test_upload_response_tolerates_minimal_results() {
        let body = json!({
            "success": true,
            "results": {
                "products": { "processed": 2, "errors": 0, "conflicts": [] },
                "sales": { "processed": 0, "errors": 1, "conflicts": [] }
            },
            "syncTimestamp": "2024-10-19T12:00:00Z"
        });

        let response: UploadResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.results.products.processed, 2);
        assert_eq!(response.results.sales.errors, 1);
        assert!(response.results.cash_sessions.applied.is_empty());
    }

    #[test]
    fn test_download_payload_defaults() {
        let body = json!({
            "id": "srv-1",
            "name": "Leche 1L",
            "code": "LAC001",
            "price": 120,
            "stock": 30,
            "lastModified": "2024-10-19T12:00:00Z"
        });

        let product: ProductPayload = serde_json::from_value(body).unwrap();
        assert_eq!(product.server_id(), Some("srv-1"));
        assert_eq!(product.unit, "unidad");
        assert!(product.active);
        assert_eq!(product.action, SyncAction::Update);
    }

    #[test]
    fn test_entity_results_counters() {
        let mut results = EntityResults::default();
        results.record_applied("a", "srv-a");
        results.record_failed("b", "boom");
        results.record_conflict(ConflictItem {
            local_id: "c".to_string(),
            server_id: None,
            reason: reasons::PRODUCT_CODE_EXISTS.to_string(),
            data: None,
            server_data: None,
            client_data: None,
        });
        assert_eq!(results.processed, 1);
        assert_eq!(results.errors, 1);
        assert_eq!(results.conflicts.len(), 1);
    }
}
