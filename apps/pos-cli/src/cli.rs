//! Command line definition.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "minisuper")]
#[command(about = "Minisuper POS: offline-first point of sale with background sync")]
#[command(version)]
pub struct Cli {
    /// Sync config file (default: platform config dir / sync.toml)
    #[arg(long, global = true, env = "MINISUPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local Store database file
    #[arg(long, global = true, env = "MINISUPER_DATABASE_PATH")]
    pub database: Option<PathBuf>,

    /// Seller / cashier id recorded on sales and sessions
    #[arg(long, global = true, env = "MINISUPER_USER_ID")]
    pub user: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Catalog management
    #[command(subcommand)]
    Product(ProductCommand),

    /// Ring up and manage sales
    #[command(subcommand)]
    Sale(SaleCommand),

    /// Open and close the cash drawer
    #[command(subcommand)]
    CashSession(CashSessionCommand),

    /// Run one sync cycle now
    Sync,

    /// Sync status and queue counts
    Status,

    /// Upload items rejected by the server
    #[command(subcommand)]
    Conflicts(ConflictCommand),

    /// Move dead-lettered queue entries back to pending
    Retry,

    /// Recent sync log entries
    Log {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Keep syncing in the background and serve the cache worker
    Daemon(DaemonArgs),
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Subcommand)]
pub enum ProductCommand {
    Add(ProductAddArgs),

    /// Change fields of a product, looked up by code
    Update(ProductUpdateArgs),

    /// Deactivate a product
    Delete { code: String },

    /// Add (or with a negative delta remove) units
    Stock {
        code: String,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },

    Show { code: String },

    List(ProductListArgs),
}

#[derive(Debug, Args)]
pub struct ProductAddArgs {
    #[arg(long)]
    pub code: String,
    #[arg(long)]
    pub name: String,
    /// Sale price, e.g. 2.50
    #[arg(long, value_parser = parse_amount)]
    pub price: i64,
    /// Purchase cost, e.g. 1.80
    #[arg(long, value_parser = parse_amount, default_value = "0")]
    pub cost: i64,
    #[arg(long, default_value_t = 0)]
    pub stock: i64,
    #[arg(long, default_value_t = 0)]
    pub min_stock: i64,
    #[arg(long)]
    pub max_stock: Option<i64>,
    #[arg(long)]
    pub barcode: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub brand: Option<String>,
    #[arg(long)]
    pub unit: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProductUpdateArgs {
    pub code: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "new-code")]
    pub new_code: Option<String>,
    #[arg(long, value_parser = parse_amount)]
    pub price: Option<i64>,
    #[arg(long, value_parser = parse_amount)]
    pub cost: Option<i64>,
    #[arg(long)]
    pub stock: Option<i64>,
    #[arg(long)]
    pub min_stock: Option<i64>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub brand: Option<String>,
    #[arg(long)]
    pub barcode: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProductListArgs {
    /// Substring of name, code or barcode
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    /// Only products at or below their minimum stock
    #[arg(long)]
    pub low_stock: bool,
    /// Include deactivated products
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub limit: Option<u32>,
}

// =============================================================================
// Sales
// =============================================================================

#[derive(Debug, Subcommand)]
pub enum SaleCommand {
    Create(SaleCreateArgs),

    Cancel { sale_number: String },

    Refund { sale_number: String },

    Show { sale_number: String },

    /// Sales of one day (default today, UTC)
    List {
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Totals of one day (default today, UTC)
    Stats {
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
}

#[derive(Debug, Args)]
pub struct SaleCreateArgs {
    /// CODE or CODE:QTY, repeatable
    #[arg(long = "item", required = true, value_parser = parse_item)]
    pub items: Vec<ItemArg>,
    /// CASH, CARD, TRANSFER or MIXED
    #[arg(long, default_value = "CASH")]
    pub payment: String,
    #[arg(long, value_parser = parse_amount, default_value = "0")]
    pub discount: i64,
    #[arg(long)]
    pub customer: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    /// Reject the sale unless the computed total matches
    #[arg(long, value_parser = parse_amount)]
    pub expected_total: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemArg {
    pub code: String,
    pub quantity: i64,
}

// =============================================================================
// Cash Sessions, Conflicts, Daemon
// =============================================================================

#[derive(Debug, Subcommand)]
pub enum CashSessionCommand {
    Open {
        /// Opening float, e.g. 100.00
        #[arg(value_parser = parse_amount)]
        amount: i64,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Close the current user's open session
    Close {
        /// Counted cash
        #[arg(value_parser = parse_amount)]
        amount: i64,
        #[arg(long)]
        notes: Option<String>,
    },

    /// The current user's open session and its totals
    Current,
}

#[derive(Debug, Subcommand)]
pub enum ConflictCommand {
    List,

    /// Drop a conflicted queue entry; the local record stays unsynced
    Discard { id: String },
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Origin the cache worker fronts
    #[arg(long, env = "MINISUPER_APP_ORIGIN", default_value = "http://localhost:3000")]
    pub app_origin: String,

    /// Run without the cache worker
    #[arg(long)]
    pub no_cache: bool,

    /// Read worker events (sync, push, ...) from stdin, one per line
    #[arg(long)]
    pub stdin_events: bool,

    /// Fire the periodic sync tag on this interval; 0 disables it
    #[arg(long, default_value_t = 0)]
    pub periodic_sync_secs: u64,
}

// =============================================================================
// Value Parsers
// =============================================================================

/// Parses a non-negative decimal amount ("2.50", "2", "0.5") into cents.
pub fn parse_amount(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    let (major, minor) = raw.split_once('.').unwrap_or((raw, ""));
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    if !digits(major) || (!minor.is_empty() && !digits(minor)) || minor.len() > 2 {
        return Err(format!("'{}' is not an amount like 2.50", raw));
    }
    let major: i64 = major
        .parse()
        .map_err(|_| format!("'{}' is too large", raw))?;
    let minor: i64 = match minor.len() {
        0 => 0,
        1 => minor.parse::<i64>().map_err(|e| e.to_string())? * 10,
        _ => minor.parse::<i64>().map_err(|e| e.to_string())?,
    };
    major
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(minor))
        .ok_or_else(|| format!("'{}' is too large", raw))
}

/// Parses `CODE` or `CODE:QTY`.
pub fn parse_item(raw: &str) -> Result<ItemArg, String> {
    let (code, quantity) = match raw.rsplit_once(':') {
        Some((code, qty)) => (
            code,
            qty.parse::<i64>()
                .map_err(|_| format!("bad quantity in '{}'", raw))?,
        ),
        None => (raw, 1),
    };
    if code.trim().is_empty() {
        return Err(format!("missing product code in '{}'", raw));
    }
    Ok(ItemArg {
        code: code.trim().to_string(),
        quantity,
    })
}
