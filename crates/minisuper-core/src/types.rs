//! # Domain Types
//!
//! Core domain types shared by the Local Store, the Sync Manager and the
//! server of record.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │  CashSession    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  local_id       │   │  local_id       │   │  local_id       │       │
//! │  │  server_id?     │   │  server_id?     │   │  server_id?     │       │
//! │  │  code (natural) │   │  sale_number    │   │  status         │       │
//! │  │  stock ≥ 0      │   │  items[]        │   │  total_sales    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ SyncQueueEntry  │   │  SyncLogEntry   │   │   SyncAction    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  payload (JSON) │   │  outcome        │   │  CREATE         │       │
//! │  │  attempts       │   │  phase          │   │  UPDATE         │       │
//! │  │  status         │   │  message        │   │  DELETE         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every synced entity has:
//! - `local_id`: UUID v4 assigned on the register, valid while offline
//! - `server_id`: assigned by the server of record after the first upload
//! - Natural key (product code, sale number): detects duplicate creation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::money::Money;
use crate::DEFAULT_TAX_RATE_BPS;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1200 bps = 12% (IVA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

/// The store default: 12% IVA.
impl Default for TaxRate {
    fn default() -> Self {
        TaxRate(DEFAULT_TAX_RATE_BPS)
    }
}

// =============================================================================
// Enum Helpers
// =============================================================================

/// Implements `as_str`, `Display` and `FromStr` for a wire enum.
///
/// The string forms are the ones stored in SQLite and sent over the wire.
macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire/storage representation.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    )),
                }
            }
        }
    };
}

// =============================================================================
// Sync Action & Entity Type
// =============================================================================

/// The pending change a queue entry (or an unsynced entity) carries.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Create,
    Update,
    /// Soft delete (`active = false`).
    Delete,
}

wire_enum!(SyncAction {
    Create => "CREATE",
    Update => "UPDATE",
    Delete => "DELETE",
});

/// Downloaded payloads carry no pending change; they read as updates.
impl Default for SyncAction {
    fn default() -> Self {
        SyncAction::Update
    }
}

/// Which table a queue entry belongs to.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Sale,
    CashSession,
}

wire_enum!(EntityType {
    Product => "product",
    Sale => "sale",
    CashSession => "cash_session",
});

// =============================================================================
// Product
// =============================================================================

/// A product in the catalog.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Client-assigned identifier (UUID v4), primary key of the Local Store.
    pub local_id: String,

    /// Server-assigned identifier, `None` until the first successful upload.
    pub server_id: Option<String>,

    pub name: String,

    /// Business key, unique across non-deleted products.
    pub code: String,

    pub barcode: Option<String>,

    /// Sale price in cents.
    pub price_cents: i64,

    /// Purchase cost in cents.
    pub cost_cents: i64,

    /// Units on hand. Never negative.
    pub stock: i64,

    pub min_stock: i64,
    pub max_stock: Option<i64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,

    /// Unit of sale ("unidad", "kg", ...).
    pub unit: String,

    pub image: Option<String>,

    /// Soft-delete flag.
    pub active: bool,

    /// True once the server has acknowledged the latest local change.
    pub synced: bool,

    /// Change waiting for upload, if any.
    pub pending_action: Option<SyncAction>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Compared against the server's `updatedAt` for stale-write detection.
    #[ts(as = "String")]
    pub last_modified: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// `stock <= min_stock`.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }

    /// Checks whether `quantity` units can be sold without going negative.
    pub fn can_sell(&self, quantity: i64) -> bool {
        self.active && self.stock >= quantity
    }
}

// =============================================================================
// Payment Method & Sale Status
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    /// Split tender.
    Mixed,
}

wire_enum!(PaymentMethod {
    Cash => "CASH",
    Card => "CARD",
    Transfer => "TRANSFER",
    Mixed => "MIXED",
});

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Cash
    }
}

/// The status of a sale.
///
/// ```text
///   PENDING ──► COMPLETED ──► CANCELLED
///                   │
///                   └───────► REFUNDED
/// ```
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaleStatus {
    Pending,
    Completed,
    Cancelled,
    Refunded,
}

wire_enum!(SaleStatus {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    Refunded => "REFUNDED",
});

impl SaleStatus {
    /// Whether a sale in this status may move to `next`.
    pub fn can_transition_to(&self, next: SaleStatus) -> bool {
        use SaleStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Cancelled)
                | (Completed, Cancelled)
                | (Completed, Refunded)
        )
    }

    /// Moving into this status gives the sold units back to inventory.
    #[inline]
    pub fn restores_stock(&self) -> bool {
        matches!(self, SaleStatus::Cancelled | SaleStatus::Refunded)
    }
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Completed
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale with its ordered line items.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub local_id: String,
    pub server_id: Option<String>,

    /// `YYYYMMDDNNNN`, unique, sequence resets daily.
    pub sale_number: String,

    #[ts(as = "String")]
    pub date: DateTime<Utc>,

    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,

    /// `subtotal - discount + tax`.
    pub total_cents: i64,

    pub payment_method: PaymentMethod,
    pub user_id: String,
    pub customer_id: Option<String>,

    /// Local id of the cash session open when the sale was rung up.
    pub cash_session_id: Option<String>,

    pub notes: Option<String>,
    pub status: SaleStatus,

    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    #[serde(default)]
    pub items: Vec<SaleItem>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub last_modified: DateTime<Utc>,

    pub synced: bool,
    pub pending_action: Option<SyncAction>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Total units across all line items.
    pub fn total_items(&self) -> i64 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item in a sale.
///
/// Snapshots the product identity at the time of sale so a queued sale can
/// be replayed without reading the product again.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleItem {
    pub local_id: String,
    pub sale_local_id: String,
    /// Position within the sale, starting at 0.
    pub position: i64,
    pub product_local_id: Option<String>,
    /// Server id of the product, when it had one at sale time.
    pub product_id: Option<String>,
    pub product_code: String,
    pub product_name: String,
    /// At least 1.
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    /// `quantity * unit_price - discount`.
    pub subtotal_cents: i64,
}

impl SaleItem {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

// =============================================================================
// Cash Session
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum CashSessionStatus {
    Open,
    Closed,
}

wire_enum!(CashSessionStatus {
    Open => "OPEN",
    Closed => "CLOSED",
});

/// A cash register session (opening float to closing count).
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashSession {
    pub local_id: String,
    pub server_id: Option<String>,
    pub user_id: String,
    pub start_amount_cents: i64,
    /// Counted cash, set on close.
    pub end_amount_cents: Option<i64>,
    /// Sum of COMPLETED sales recorded in the session.
    pub total_sales_cents: i64,
    pub status: CashSessionStatus,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub synced: bool,
    pub pending_action: Option<SyncAction>,
    #[ts(as = "String")]
    pub last_modified: DateTime<Utc>,
}

impl CashSession {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == CashSessionStatus::Open
    }

    /// Cash expected in the drawer: opening float plus completed sales.
    pub fn expected_amount(&self) -> Money {
        Money::from_cents(self.start_amount_cents + self.total_sales_cents)
    }
}

// =============================================================================
// Sync Queue
// =============================================================================

/// Lifecycle state of a queue entry.
///
/// ```text
///  PENDING ──(ack)──► removed
///     │ ╲
///     │  ╲─(natural key / stale write)──► CONFLICT ──(discard)──► removed
///     │
///     └─(max attempts)──► DEAD_LETTER ──(requeue)──► PENDING
/// ```
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Conflict,
    DeadLetter,
}

wire_enum!(QueueStatus {
    Pending => "PENDING",
    Conflict => "CONFLICT",
    DeadLetter => "DEAD_LETTER",
});

/// A durable sync intent, written in the same transaction as the mutation.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncQueueEntry {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_local_id: String,
    pub action: SyncAction,
    /// Full entity snapshot as JSON (wire payload shape).
    pub payload: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Earliest time the entry may be retried.
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: QueueStatus,
    pub conflict_reason: Option<String>,
    /// Server version attached to a conflict, as JSON.
    pub server_data: Option<String>,
}

/// Queue counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueCounts {
    pub pending: i64,
    pub conflicts: i64,
    pub dead_letters: i64,
}

// =============================================================================
// Sync Log
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Upload,
    Download,
}

wire_enum!(SyncPhase {
    Upload => "upload",
    Download => "download",
});

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncOutcome {
    Success,
    Error,
    Conflict,
}

wire_enum!(SyncOutcome {
    Success => "SUCCESS",
    Error => "ERROR",
    Conflict => "CONFLICT",
});

/// One audit record of a sync outcome.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncLogEntry {
    pub id: String,
    pub cycle_id: String,
    pub phase: SyncPhase,
    pub entity_type: Option<EntityType>,
    pub entity_local_id: Option<String>,
    pub outcome: SyncOutcome,
    pub message: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Inputs
// =============================================================================

/// Fields for a new product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub code: String,
    pub barcode: Option<String>,
    pub price_cents: i64,
    pub cost_cents: i64,
    pub stock: i64,
    pub min_stock: i64,
    pub max_stock: Option<i64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    /// Defaults to "unidad".
    pub unit: Option<String>,
    pub image: Option<String>,
}

/// Partial product update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub barcode: Option<String>,
    pub price_cents: Option<i64>,
    pub cost_cents: Option<i64>,
    pub stock: Option<i64>,
    pub min_stock: Option<i64>,
    pub max_stock: Option<i64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub image: Option<String>,
    pub active: Option<bool>,
}

impl ProductUpdate {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        *self == ProductUpdate::default()
    }
}

/// A requested line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewSaleItem {
    pub product_local_id: String,
    pub quantity: i64,
    /// Overrides the catalog price when set.
    pub unit_price_cents: Option<i64>,
    #[serde(default)]
    pub discount_cents: i64,
}

/// A requested sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewSale {
    pub user_id: String,
    pub customer_id: Option<String>,
    pub payment_method: PaymentMethod,
    /// Sale-level discount in cents.
    #[serde(default)]
    pub discount_cents: i64,
    pub notes: Option<String>,
    pub items: Vec<NewSaleItem>,
    /// When set, the recomputed total must match it exactly.
    pub expected_total_cents: Option<i64>,
}

// =============================================================================
// Filters & Stats
// =============================================================================

/// Product list filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub category: Option<String>,
    pub active: Option<bool>,
    /// Substring of name, code or barcode.
    pub search: Option<String>,
    /// Only `stock <= min_stock`.
    #[serde(default)]
    pub low_stock: bool,
    pub limit: Option<u32>,
}

/// Sale list filter. `from` inclusive, `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleFilter {
    #[ts(as = "Option<String>")]
    pub from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub to: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<SaleStatus>,
    pub limit: Option<u32>,
}

/// Sales summary for a day or a cash session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SalesStats {
    pub total_sales_cents: i64,
    pub total_items: i64,
    pub sales_count: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_default_is_iva() {
        assert_eq!(TaxRate::default().bps(), 1200);
        assert!((TaxRate::default().percentage() - 12.0).abs() < 0.001);
    }

    #[test]
    fn test_enum_wire_strings() {
        assert_eq!(SyncAction::Create.to_string(), "CREATE");
        assert_eq!(EntityType::CashSession.as_str(), "cash_session");
        assert_eq!(QueueStatus::DeadLetter.as_str(), "DEAD_LETTER");
        assert_eq!("TRANSFER".parse::<PaymentMethod>(), Ok(PaymentMethod::Transfer));
        assert!("bogus".parse::<SaleStatus>().is_err());

        let json = serde_json::to_string(&EntityType::CashSession).unwrap();
        assert_eq!(json, "\"cash_session\"");
        let json = serde_json::to_string(&QueueStatus::DeadLetter).unwrap();
        assert_eq!(json, "\"DEAD_LETTER\"");
    }

    #[test]
    fn test_sale_status_transitions() {
        assert!(SaleStatus::Completed.can_transition_to(SaleStatus::Refunded));
        assert!(SaleStatus::Pending.can_transition_to(SaleStatus::Completed));
        assert!(!SaleStatus::Cancelled.can_transition_to(SaleStatus::Completed));
        assert!(!SaleStatus::Refunded.can_transition_to(SaleStatus::Cancelled));
        assert!(SaleStatus::Cancelled.restores_stock());
        assert!(!SaleStatus::Completed.restores_stock());
    }

    #[test]
    fn test_product_update_is_empty() {
        assert!(ProductUpdate::default().is_empty());
        let update = ProductUpdate {
            price_cents: Some(300),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
