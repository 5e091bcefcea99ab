//! # Sale Totals
//!
//! Line subtotals and the sale total, recomputed from items on every sale
//! creation and checked against any total the caller expected.
//!
//! ```text
//! item.subtotal = quantity × unit_price − item.discount
//! subtotal      = Σ item.subtotal
//! tax           = round_half_up((subtotal − discount) × bps / 10000)
//! total         = subtotal − discount + tax
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Sale, TaxRate};

/// Computes a line subtotal.
///
/// Fails when the line discount exceeds the gross line amount.
///
/// ```rust
/// use minisuper_core::money::Money;
/// use minisuper_core::totals::line_subtotal;
///
/// let subtotal = line_subtotal(3, Money::from_cents(250), Money::zero()).unwrap();
/// assert_eq!(subtotal.cents(), 750);
/// ```
pub fn line_subtotal(quantity: i64, unit_price: Money, discount: Money) -> CoreResult<Money> {
    let gross = unit_price.multiply_quantity(quantity);
    if discount.is_negative() {
        return Err(ValidationError::Negative {
            field: "item discount".to_string(),
        }
        .into());
    }
    if discount > gross {
        return Err(ValidationError::OutOfRange {
            field: "item discount".to_string(),
            min: 0,
            max: gross.cents(),
        }
        .into());
    }
    Ok(gross - discount)
}

/// The money columns of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

impl SaleTotals {
    /// Computes totals from line subtotals, a sale-level discount and a rate.
    pub fn compute<I>(line_subtotals: I, discount: Money, rate: TaxRate) -> CoreResult<Self>
    where
        I: IntoIterator<Item = Money>,
    {
        let subtotal: Money = line_subtotals.into_iter().sum();

        if discount.is_negative() {
            return Err(ValidationError::Negative {
                field: "discount".to_string(),
            }
            .into());
        }
        if discount > subtotal {
            return Err(ValidationError::OutOfRange {
                field: "discount".to_string(),
                min: 0,
                max: subtotal.cents(),
            }
            .into());
        }

        let taxable = subtotal - discount;
        let tax = taxable.calculate_tax(rate);

        Ok(SaleTotals {
            subtotal,
            discount,
            tax,
            total: taxable + tax,
        })
    }

    /// Checks the computed total against the total the caller expected.
    pub fn reconcile(&self, expected_total: Money) -> CoreResult<()> {
        if self.total != expected_total {
            return Err(CoreError::TotalsMismatch {
                computed: self.total.cents(),
                expected: expected_total.cents(),
            });
        }
        Ok(())
    }

    /// Checks that a stored sale is internally consistent.
    ///
    /// Tax is taken as stored (the rate may have changed since), the rest
    /// must add up from the items.
    pub fn verify_sale(sale: &Sale) -> CoreResult<()> {
        for item in &sale.items {
            let expected = line_subtotal(
                item.quantity,
                Money::from_cents(item.unit_price_cents),
                Money::from_cents(item.discount_cents),
            )?;
            if expected.cents() != item.subtotal_cents {
                return Err(CoreError::TotalsMismatch {
                    computed: expected.cents(),
                    expected: item.subtotal_cents,
                });
            }
        }

        let subtotal: i64 = sale.items.iter().map(|item| item.subtotal_cents).sum();
        let computed = subtotal - sale.discount_cents + sale.tax_cents;
        if subtotal != sale.subtotal_cents || computed != sale.total_cents {
            return Err(CoreError::TotalsMismatch {
                computed,
                expected: sale.total_cents,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(values: &[i64]) -> Vec<Money> {
        values.iter().copied().map(Money::from_cents).collect()
    }

    #[test]
    fn test_line_subtotal_with_discount() {
        let subtotal = line_subtotal(4, Money::from_cents(125), Money::from_cents(50)).unwrap();
        assert_eq!(subtotal.cents(), 450);
    }

    #[test]
    fn test_line_discount_larger_than_line_fails() {
        let result = line_subtotal(1, Money::from_cents(100), Money::from_cents(101));
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_compute_totals() {
        // 750 + 250 = 1000, minus 100 = 900 taxable, 12% = 108
        let totals =
            SaleTotals::compute(cents(&[750, 250]), Money::from_cents(100), TaxRate::default())
                .unwrap();
        assert_eq!(totals.subtotal.cents(), 1000);
        assert_eq!(totals.tax.cents(), 108);
        assert_eq!(totals.total.cents(), 1008);
        assert_eq!(
            totals.total,
            totals.subtotal - totals.discount + totals.tax
        );
    }

    #[test]
    fn test_compute_with_zero_rate() {
        let totals = SaleTotals::compute(cents(&[750]), Money::zero(), TaxRate::zero()).unwrap();
        assert_eq!(totals.total.cents(), 750);
        assert!(totals.tax.is_zero());
    }

    #[test]
    fn test_discount_larger_than_subtotal_fails() {
        let result = SaleTotals::compute(cents(&[100]), Money::from_cents(200), TaxRate::zero());
        assert!(result.is_err());
    }

    #[test]
    fn test_reconcile() {
        let totals = SaleTotals::compute(cents(&[750]), Money::zero(), TaxRate::default()).unwrap();
        assert!(totals.reconcile(Money::from_cents(840)).is_ok());
        assert!(matches!(
            totals.reconcile(Money::from_cents(750)),
            Err(CoreError::TotalsMismatch {
                computed: 840,
                expected: 750
            })
        ));
    }
}
