//! # minisuper-core: Pure Business Logic for Minisuper POS
//!
//! Domain types, money math, sale totals, validation rules and the sync wire
//! protocol. Everything here is deterministic and free of I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Minisuper POS Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              pos-cli / PWA front end (UI is external)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ minisuper-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  totals   │  │ validation│  │   │
//! │  │   │  Product  │  │   Money   │  │ SaleTotals│  │   rules   │  │   │
//! │  │   │   Sale    │  │  TaxRate  │  │ reconcile │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                  ┌───────────────────────────┐                  │   │
//! │  │                  │ protocol (upload/download)│                  │   │
//! │  │                  └───────────────────────────┘                  │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        minisuper-db (Local Store)  /  sync-server (REST)         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Sale, CashSession, queue entries)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`totals`] - Sale item subtotals and sale total reconciliation
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//! - [`protocol`] - Upload/download payloads shared by client and server
//!
//! ## Example Usage
//!
//! ```rust
//! use minisuper_core::money::Money;
//! use minisuper_core::types::TaxRate;
//!
//! let price = Money::from_cents(250); // $2.50
//! let tax = price.calculate_tax(TaxRate::from_bps(1200)); // 12% IVA
//! assert_eq!(tax.cents(), 30);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod protocol;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use totals::SaleTotals;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default sales tax in basis points (12% IVA).
pub const DEFAULT_TAX_RATE_BPS: u32 = 1200;

/// Unit assigned to products created without one.
pub const DEFAULT_UNIT: &str = "unidad";

/// Maximum line items in a single sale.
pub const MAX_SALE_ITEMS: usize = 100;

/// Maximum quantity of a single line item.
///
/// Guards against typing 1000 instead of 10 at the register.
pub const MAX_ITEM_QUANTITY: i64 = 999;
