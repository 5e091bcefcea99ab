//! # Validation Module
//!
//! Input validation for everything the register can write.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (before any write)                               │
//! │  ├── Format checks (code, sale number, uuid)                           │
//! │  └── Range checks (quantity, price, stock, discount)                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Local Store transaction                                      │
//! │  ├── Stock availability (InsufficientStock)                            │
//! │  └── Code uniqueness (Duplicate)                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite constraints (NOT NULL, UNIQUE, CHECK stock >= 0)      │
//! │                                                                         │
//! │  A mutation rejected at any layer never reaches the sync queue.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use minisuper_core::validation::{validate_product_code, validate_quantity};
//!
//! validate_product_code("BEB001").unwrap();
//! validate_quantity(3).unwrap();
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::types::{NewProduct, NewSale, ProductUpdate};
use crate::{MAX_ITEM_QUANTITY, MAX_SALE_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_CODE_LEN: usize = 50;
const MAX_NAME_LEN: usize = 200;
const MAX_SEARCH_LEN: usize = 100;
const MAX_NOTES_LEN: usize = 500;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a product code (the natural key).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Letters, digits, hyphens and underscores only
///
/// ```rust
/// use minisuper_core::validation::validate_product_code;
///
/// assert!(validate_product_code("BEB001").is_ok());
/// assert!(validate_product_code("").is_err());
/// assert!(validate_product_code("BEB 001").is_err());
/// ```
pub fn validate_product_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::required("code"));
    }

    if code.chars().count() > MAX_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: MAX_CODE_LEN,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name: non-empty, at most 200 characters.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::required("name"));
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a search term. Empty is allowed (lists everything).
pub fn validate_search_query(query: &str) -> ValidationResult<()> {
    if query.chars().count() > MAX_SEARCH_LEN {
        return Err(ValidationError::TooLong {
            field: "search".to_string(),
            max: MAX_SEARCH_LEN,
        });
    }
    Ok(())
}

/// Validates free-text notes.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<()> {
    match notes {
        Some(text) if text.chars().count() > MAX_NOTES_LEN => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        }),
        _ => Ok(()),
    }
}

/// Validates a UUID string.
pub fn validate_uuid(field: &str, value: &str) -> ValidationResult<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

/// Validates a sale number: `YYYYMMDDNNNN` with a real calendar date.
///
/// ```rust
/// use minisuper_core::validation::validate_sale_number;
///
/// assert!(validate_sale_number("202410190001").is_ok());
/// assert!(validate_sale_number("202413190001").is_err()); // month 13
/// assert!(validate_sale_number("20241019001").is_err()); // 11 digits
/// ```
pub fn validate_sale_number(sale_number: &str) -> ValidationResult<()> {
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "sale_number".to_string(),
        reason: reason.to_string(),
    };

    if sale_number.len() != 12 || !sale_number.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("expected 12 digits (YYYYMMDDNNNN)"));
    }

    NaiveDate::parse_from_str(&sale_number[..8], "%Y%m%d")
        .map_err(|_| invalid("first 8 digits must be a valid date"))?;

    if &sale_number[8..] == "0000" {
        return Err(invalid("sequence starts at 0001"));
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line item quantity: 1..=999.
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if !(1..=MAX_ITEM_QUANTITY).contains(&quantity) {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a non-negative money or count field.
pub fn validate_non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a price in cents.
#[inline]
pub fn validate_price(price_cents: i64) -> ValidationResult<()> {
    validate_non_negative("price", price_cents)
}

/// Validates a stock level.
#[inline]
pub fn validate_stock(stock: i64) -> ValidationResult<()> {
    validate_non_negative("stock", stock)
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates every field of a new product.
pub fn validate_new_product(product: &NewProduct) -> ValidationResult<()> {
    validate_product_name(&product.name)?;
    validate_product_code(&product.code)?;
    validate_price(product.price_cents)?;
    validate_non_negative("cost", product.cost_cents)?;
    validate_stock(product.stock)?;
    validate_non_negative("min_stock", product.min_stock)?;
    if let Some(max) = product.max_stock {
        validate_non_negative("max_stock", max)?;
    }
    validate_notes(product.description.as_deref())
}

/// Validates the fields a product update sets.
pub fn validate_product_update(update: &ProductUpdate) -> ValidationResult<()> {
    if let Some(name) = &update.name {
        validate_product_name(name)?;
    }
    if let Some(code) = &update.code {
        validate_product_code(code)?;
    }
    if let Some(price) = update.price_cents {
        validate_price(price)?;
    }
    if let Some(cost) = update.cost_cents {
        validate_non_negative("cost", cost)?;
    }
    if let Some(stock) = update.stock {
        validate_stock(stock)?;
    }
    if let Some(min) = update.min_stock {
        validate_non_negative("min_stock", min)?;
    }
    Ok(())
}

/// Validates the shape of a sale request (stock is checked by the store).
pub fn validate_new_sale(sale: &NewSale) -> ValidationResult<()> {
    if sale.user_id.trim().is_empty() {
        return Err(ValidationError::required("user_id"));
    }
    if sale.items.is_empty() {
        return Err(ValidationError::required("items"));
    }
    if sale.items.len() > MAX_SALE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_SALE_ITEMS as i64,
        });
    }
    validate_non_negative("discount", sale.discount_cents)?;
    validate_notes(sale.notes.as_deref())?;

    for item in &sale.items {
        if item.product_local_id.trim().is_empty() {
            return Err(ValidationError::required("product_local_id"));
        }
        validate_quantity(item.quantity)?;
        if let Some(price) = item.unit_price_cents {
            validate_price(price)?;
        }
        validate_non_negative("item discount", item.discount_cents)?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
