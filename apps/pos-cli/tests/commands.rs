//! Command lines run end to end against an in-memory Local Store.

use clap::Parser;
use minisuper_core::{SaleFilter, SaleStatus};
use minisuper_db::{Database, DbConfig};
use minisuper_pos::cli::Cli;
use minisuper_pos::context::AppContext;
use minisuper_pos::dispatch;
use minisuper_pos::error::CliError;
use minisuper_sync::{SyncConfig, SyncMode};

async fn offline_context() -> AppContext {
    let mut config = SyncConfig::default();
    config.sync.mode = SyncMode::Offline;
    config.store.user_id = "cashier-1".to_string();
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    AppContext::from_parts(config, db, true)
}

async fn exec(ctx: &AppContext, line: &[&str]) -> Result<(), CliError> {
    let cli = Cli::try_parse_from(std::iter::once("minisuper").chain(line.iter().copied()))
        .expect("command line parses");
    dispatch(ctx, cli.command).await
}

#[tokio::test]
async fn test_register_day_offline() {
    let ctx = offline_context().await;

    exec(
        &ctx,
        &["product", "add", "--code", "BEB001", "--name", "Coca Cola 500ml", "--price", "2.50", "--stock", "45"],
    )
    .await
    .unwrap();
    exec(&ctx, &["product", "stock", "BEB001", "-5"]).await.unwrap();
    exec(&ctx, &["cash-session", "open", "100"]).await.unwrap();
    exec(&ctx, &["sale", "create", "--item", "BEB001:3"]).await.unwrap();

    let product = ctx.db.products().get_by_code("BEB001").await.unwrap().unwrap();
    assert_eq!(product.price_cents, 250);
    assert_eq!(product.stock, 37);

    let sales = ctx.db.sales().list(&SaleFilter::default()).await.unwrap();
    assert_eq!(sales.len(), 1);
    let session = ctx.db.cash_sessions().current("cashier-1").await.unwrap().unwrap();
    assert_eq!(sales[0].cash_session_id.as_deref(), Some(session.local_id.as_str()));

    exec(&ctx, &["sale", "cancel", sales[0].sale_number.as_str()]).await.unwrap();
    let cancelled = ctx
        .db
        .sales()
        .get_by_sale_number(&sales[0].sale_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, SaleStatus::Cancelled);
    let product = ctx.db.products().get_by_code("BEB001").await.unwrap().unwrap();
    assert_eq!(product.stock, 40);

    // Everything is waiting for the server.
    let counts = ctx.db.sync_queue().counts().await.unwrap();
    assert!(counts.pending > 0);
    exec(&ctx, &["status"]).await.unwrap();

    exec(&ctx, &["cash-session", "close", "107.50"]).await.unwrap();
    assert!(ctx.db.cash_sessions().current("cashier-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sync_refused_when_offline() {
    let ctx = offline_context().await;

    let err = exec(&ctx, &["sync"]).await.unwrap_err();
    assert!(matches!(err, CliError::InvalidArgument(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_unknown_codes_and_stock_errors() {
    let ctx = offline_context().await;

    let err = exec(&ctx, &["product", "show", "NOPE"]).await.unwrap_err();
    assert!(matches!(err, CliError::NotFound { .. }));

    exec(&ctx, &["product", "add", "--code", "PAN001", "--name", "Pan", "--price", "0.80", "--stock", "2"])
        .await
        .unwrap();
    let err = exec(&ctx, &["sale", "create", "--item", "PAN001:5"]).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);

    let err = exec(&ctx, &["sale", "create", "--item", "PAN001", "--payment", "cheque"])
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::InvalidArgument(_)));

    // Nothing was sold.
    let product = ctx.db.products().get_by_code("PAN001").await.unwrap().unwrap();
    assert_eq!(product.stock, 2);
}

#[tokio::test]
async fn test_open_creates_store_from_flags() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("sync.toml");
    std::fs::write(&config, "[sync]\nmode = \"offline\"\n").unwrap();
    let database = dir.path().join("register").join("pos.db");

    let cli = Cli::try_parse_from([
        "minisuper",
        "--config",
        config.to_str().unwrap(),
        "--database",
        database.to_str().unwrap(),
        "--user",
        "caja-2",
        "status",
    ])
    .unwrap();
    let ctx = AppContext::open(&cli).await.unwrap();

    assert!(database.exists());
    assert_eq!(ctx.user_id(), "caja-2");
    assert_eq!(ctx.config.mode(), SyncMode::Offline);
    dispatch(&ctx, cli.command).await.unwrap();
    ctx.db.close().await;
}
