//! `minisuper sync | status | conflicts | retry | log`

use minisuper_core::SyncQueueEntry;
use minisuper_sync::{SyncReport, SyncStatus, SyncTrigger};
use serde_json::json;

use crate::cli::ConflictCommand;
use crate::context::AppContext;
use crate::error::{CliError, CliResult};

pub async fn sync_now(ctx: &AppContext) -> CliResult<()> {
    let manager = ctx.manager()?;
    let report = manager.sync(SyncTrigger::Manual).await?;
    ctx.emit(&report, print_report)
}

pub async fn status(ctx: &AppContext) -> CliResult<()> {
    let status = match ctx.manager() {
        Ok(manager) => manager.status().await?,
        // Sync turned off: report local counts only.
        Err(CliError::InvalidArgument(_)) => offline_status(ctx).await?,
        Err(e) => return Err(e),
    };
    ctx.emit(&status, |status| {
        println!("state        {}", status.state);
        println!("online       {}", status.is_online);
        println!("pending      {}", status.pending_count);
        println!("conflicts    {}", status.conflict_count);
        println!("dead letters {}", status.dead_letter_count);
        match status.last_sync_at {
            Some(at) => println!("last sync    {}", at.to_rfc3339()),
            None => println!("last sync    never"),
        }
        if let Some(err) = &status.last_error {
            println!("last error   {}", err);
        }
    })
}

async fn offline_status(ctx: &AppContext) -> CliResult<SyncStatus> {
    let counts = ctx.db.sync_queue().counts().await?;
    Ok(SyncStatus {
        pending_count: counts.pending,
        conflict_count: counts.conflicts,
        dead_letter_count: counts.dead_letters,
        last_sync_at: ctx.db.sync_state().last_successful_sync().await?,
        ..Default::default()
    })
}

pub async fn conflicts(ctx: &AppContext, command: ConflictCommand) -> CliResult<()> {
    match command {
        ConflictCommand::List => {
            let entries = ctx.db.sync_queue().conflicts().await?;
            ctx.emit(&entries, |entries| {
                for entry in entries {
                    print_conflict(entry);
                }
                println!("{} conflict(s)", entries.len());
            })
        }
        ConflictCommand::Discard { id } => {
            if !ctx.db.sync_queue().discard_conflict(&id).await? {
                return Err(CliError::not_found("Conflict", id));
            }
            ctx.emit(&json!({ "discarded": id }), |_| {
                println!("Discarded {}; the local record stays unsynced", id)
            })
        }
    }
}

pub async fn retry(ctx: &AppContext) -> CliResult<()> {
    let requeued = ctx.db.sync_queue().requeue_dead_letters().await?;
    ctx.emit(&json!({ "requeued": requeued }), |_| {
        println!("Requeued {} dead-lettered entries", requeued)
    })
}

pub async fn log(ctx: &AppContext, limit: u32) -> CliResult<()> {
    let entries = ctx.db.sync_log().recent(limit).await?;
    ctx.emit(&entries, |entries| {
        for entry in entries {
            println!(
                "{}  {:<8} {:<8} {:<12} {}",
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.phase,
                entry.outcome,
                entry
                    .entity_type
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
                entry.message
            );
        }
    })
}

fn print_report(report: &SyncReport) {
    println!(
        "Sync {} ({}): uploaded {}, conflicts {}, failed {}, dead-lettered {}",
        report.cycle_id,
        report.trigger,
        report.upload.uploaded,
        report.upload.conflicts,
        report.upload.failed,
        report.upload.dead_lettered
    );
    println!(
        "  downloaded: {} new product(s), {} updated, {} sale(s), {} skipped",
        report.download.products_inserted,
        report.download.products_updated,
        report.download.sales_inserted,
        report.download.skipped
    );
}

fn print_conflict(entry: &SyncQueueEntry) {
    println!(
        "{}  {:<12} {:<6} {}  {}",
        entry.id,
        entry.entity_type,
        entry.action,
        entry.entity_local_id,
        entry.conflict_reason.as_deref().unwrap_or("-")
    );
}
