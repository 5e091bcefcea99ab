//! Command handlers, one module per command group.

pub mod cash_session;
pub mod daemon;
pub mod product;
pub mod sale;
pub mod sync;

use minisuper_core::Money;

/// `$2.50` style rendering for terminal output.
pub(crate) fn money(cents: i64) -> String {
    Money::from_cents(cents).to_string()
}

pub(crate) fn sync_marker(synced: bool) -> &'static str {
    if synced {
        ""
    } else {
        " *"
    }
}
