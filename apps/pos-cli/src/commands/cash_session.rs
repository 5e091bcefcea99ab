//! `minisuper cash-session ...`

use minisuper_core::{CashSession, SalesStats};
use serde::Serialize;

use super::{money, sync_marker};
use crate::cli::CashSessionCommand;
use crate::context::AppContext;
use crate::error::{CliError, CliResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionReport {
    session: CashSession,
    stats: SalesStats,
}

pub async fn run(ctx: &AppContext, command: CashSessionCommand) -> CliResult<()> {
    match command {
        CashSessionCommand::Open { amount, notes } => {
            let session = ctx
                .db
                .recorder()
                .open_cash_session(ctx.user_id(), amount, notes)
                .await?;
            ctx.emit(&session, print_session)
        }
        CashSessionCommand::Close { amount, notes } => {
            let current = current_session(ctx).await?;
            let session = ctx
                .db
                .recorder()
                .close_cash_session(&current.local_id, amount, notes)
                .await?;
            ctx.emit(&session, |session| {
                print_session(session);
                if let Some(end) = session.end_amount_cents {
                    let expected = session.start_amount_cents + session.total_sales_cents;
                    println!("    counted {}  expected {}", money(end), money(expected));
                }
            })
        }
        CashSessionCommand::Current => {
            let session = current_session(ctx).await?;
            let stats = ctx.db.cash_sessions().stats(&session.local_id).await?;
            ctx.emit(&SessionReport { session, stats }, |report| {
                print_session(&report.session);
                println!(
                    "    {} sale(s), {} item(s), {}",
                    report.stats.sales_count,
                    report.stats.total_items,
                    money(report.stats.total_sales_cents)
                );
            })
        }
    }
}

async fn current_session(ctx: &AppContext) -> CliResult<CashSession> {
    ctx.db
        .cash_sessions()
        .current(ctx.user_id())
        .await?
        .ok_or_else(|| CliError::not_found("Open cash session for user", ctx.user_id()))
}

fn print_session(session: &CashSession) {
    println!(
        "{}  {:<6} opened {}  float {}  sales {}{}",
        session.local_id,
        session.status,
        session.opened_at.format("%Y-%m-%d %H:%M"),
        money(session.start_amount_cents),
        money(session.total_sales_cents),
        sync_marker(session.synced)
    );
}
