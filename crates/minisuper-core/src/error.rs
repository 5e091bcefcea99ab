//! # Error Types
//!
//! Domain-specific error types for minisuper-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  minisuper-core errors (this file)                                     │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Malformed input, rejected before queuing       │
//! │                                                                         │
//! │  minisuper-db         └── DbError    - Local Store failures            │
//! │  minisuper-sync       └── SyncError  - Sync cycle failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError / CLI         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found (or is inactive).
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Insufficient stock to complete a sale.
    ///
    /// ## User Workflow
    /// ```text
    /// Sell BEB001 (qty: 5)
    ///      │
    ///      ▼
    /// Check stock: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { code: "BEB001", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole sale rolled back, nothing queued
    /// ```
    #[error("Insufficient stock for {code}: available {available}, requested {requested}")]
    InsufficientStock {
        code: String,
        available: i64,
        requested: i64,
    },

    /// Sale not found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Sale is not in a state that allows the requested transition.
    #[error("Sale {sale_number} is {current_status}, cannot change to {requested_status}")]
    InvalidSaleStatus {
        sale_number: String,
        current_status: String,
        requested_status: String,
    },

    /// Recomputed total does not match the total the caller expected.
    #[error("Sale total mismatch: computed {computed} cents, expected {expected} cents")]
    TotalsMismatch { computed: i64, expected: i64 },

    /// Sale has more line items than allowed.
    #[error("Sale cannot have more than {max} items")]
    TooManyItems { max: usize },

    /// Cash session not found.
    #[error("Cash session not found: {0}")]
    CashSessionNotFound(String),

    /// A user already has an open cash session.
    #[error("User {user_id} already has an open cash session")]
    CashSessionAlreadyOpen { user_id: String },

    /// Cash session has already been closed.
    #[error("Cash session {0} is already closed")]
    CashSessionClosed(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything touches the Local Store, so a rejected mutation
/// never reaches the sync queue.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., invalid UUID, invalid sale number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., duplicate product code).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
