//! `minisuper sale ...`

use chrono::{Duration, NaiveDate, Utc};
use minisuper_core::{NewSale, NewSaleItem, PaymentMethod, Sale, SaleFilter, SaleStatus};
use tracing::info;

use super::product::find_by_code;
use super::{money, sync_marker};
use crate::cli::{SaleCommand, SaleCreateArgs};
use crate::context::AppContext;
use crate::error::{CliError, CliResult};

pub async fn run(ctx: &AppContext, command: SaleCommand) -> CliResult<()> {
    match command {
        SaleCommand::Create(args) => create(ctx, args).await,
        SaleCommand::Cancel { sale_number } => {
            change_status(ctx, &sale_number, SaleStatus::Cancelled).await
        }
        SaleCommand::Refund { sale_number } => {
            change_status(ctx, &sale_number, SaleStatus::Refunded).await
        }
        SaleCommand::Show { sale_number } => {
            let sale = find_by_number(ctx, &sale_number).await?;
            ctx.emit(&sale, print_sale_detail)
        }
        SaleCommand::List { date, limit } => {
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let (from, to) = day_bounds(day)?;
            let filter = SaleFilter {
                from: Some(from),
                to: Some(to),
                limit,
                ..Default::default()
            };
            let sales = ctx.db.sales().list(&filter).await?;
            ctx.emit(&sales, |sales| {
                for sale in sales {
                    print_sale(sale);
                }
                println!("{} sale(s) on {}", sales.len(), day);
            })
        }
        SaleCommand::Stats { date } => {
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let stats = ctx.db.sales().daily_stats(day).await?;
            ctx.emit(&stats, |stats| {
                println!(
                    "{}: {} sale(s), {} item(s), total {}",
                    day,
                    stats.sales_count,
                    stats.total_items,
                    money(stats.total_sales_cents)
                );
            })
        }
    }
}

async fn create(ctx: &AppContext, args: SaleCreateArgs) -> CliResult<()> {
    let payment_method: PaymentMethod = args
        .payment
        .to_uppercase()
        .parse()
        .map_err(CliError::InvalidArgument)?;

    let mut items = Vec::with_capacity(args.items.len());
    for item in &args.items {
        let product = find_by_code(ctx, &item.code).await?;
        items.push(NewSaleItem {
            product_local_id: product.local_id,
            quantity: item.quantity,
            unit_price_cents: None,
            discount_cents: 0,
        });
    }

    let sale = ctx
        .db
        .recorder()
        .create_sale(NewSale {
            user_id: ctx.user_id().to_string(),
            customer_id: args.customer,
            payment_method,
            discount_cents: args.discount,
            notes: args.notes,
            items,
            expected_total_cents: args.expected_total,
        })
        .await?;
    info!(sale_number = %sale.sale_number, total = sale.total_cents, "Sale recorded");
    ctx.emit(&sale, print_sale_detail)
}

async fn change_status(ctx: &AppContext, sale_number: &str, status: SaleStatus) -> CliResult<()> {
    let sale = find_by_number(ctx, sale_number).await?;
    let sale = ctx
        .db
        .recorder()
        .update_sale_status(&sale.local_id, status)
        .await?;
    ctx.emit(&sale, print_sale)
}

async fn find_by_number(ctx: &AppContext, sale_number: &str) -> CliResult<Sale> {
    ctx.db
        .sales()
        .get_by_sale_number(sale_number)
        .await?
        .ok_or_else(|| CliError::not_found("Sale", sale_number))
}

/// `[day 00:00, next day 00:00)` in UTC.
fn day_bounds(day: NaiveDate) -> CliResult<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
    let start = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument(format!("bad date {}", day)))?
        .and_utc();
    Ok((start, start + Duration::days(1)))
}

fn print_sale(sale: &Sale) {
    println!(
        "{}  {}  {:<9} {:<8} {:>10}{}",
        sale.sale_number,
        sale.date.format("%H:%M"),
        sale.status,
        sale.payment_method,
        money(sale.total_cents),
        sync_marker(sale.synced)
    );
}

fn print_sale_detail(sale: &Sale) {
    print_sale(sale);
    for item in &sale.items {
        println!(
            "    {:>3} x {:<12} {:<28} {:>10}",
            item.quantity,
            item.product_code,
            item.product_name,
            money(item.subtotal_cents)
        );
    }
    println!(
        "    subtotal {}  discount {}  tax {}  total {}",
        money(sale.subtotal_cents),
        money(sale.discount_cents),
        money(sale.tax_cents),
        money(sale.total_cents)
    );
}
