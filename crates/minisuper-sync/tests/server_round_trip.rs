//! Sync Manager against the real server of record, run in-process.

use std::sync::Arc;

use minisuper_core::protocol::reasons;
use minisuper_core::{NewProduct, NewSale, NewSaleItem, PaymentMethod, ProductUpdate};
use minisuper_db::{Database, DbConfig};
use minisuper_server::{serve, AppState, ServerConfig};
use minisuper_sync::{HttpSyncApi, ServerSettings, SyncError, SyncManager, SyncTrigger};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Harness {
    settings: ServerSettings,
    _shutdown: oneshot::Sender<()>,
}

async fn start_server() -> Harness {
    let state = AppState::connect(ServerConfig::in_memory("round-trip-secret"))
        .await
        .unwrap();
    let token = state
        .issue_token("cashier-1", "caja1@minisuper.local", "CASHIER")
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();
    tokio::spawn(serve(listener, state, async {
        let _ = rx.await;
    }));

    Harness {
        settings: ServerSettings {
            base_url,
            auth_token: Some(token),
            request_timeout_secs: 5,
        },
        _shutdown: tx,
    }
}

async fn register(harness: &Harness) -> (Database, SyncManager) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let api = Arc::new(HttpSyncApi::new(&harness.settings).unwrap());
    let manager = SyncManager::builder(db.clone(), api).build();
    (db, manager)
}

fn new_product(code: &str, stock: i64) -> NewProduct {
    NewProduct {
        name: format!("Producto {}", code),
        code: code.to_string(),
        price_cents: 250,
        cost_cents: 180,
        stock,
        ..Default::default()
    }
}

fn new_sale(product_local_id: &str, quantity: i64) -> NewSale {
    NewSale {
        user_id: "cashier-1".to_string(),
        customer_id: None,
        payment_method: PaymentMethod::Cash,
        discount_cents: 0,
        notes: None,
        items: vec![NewSaleItem {
            product_local_id: product_local_id.to_string(),
            quantity,
            unit_price_cents: None,
            discount_cents: 0,
        }],
        expected_total_cents: None,
    }
}

#[tokio::test]
async fn test_products_round_trip_without_conflicts() {
    let harness = start_server().await;
    let (db, manager) = register(&harness).await;

    for i in 0..25 {
        db.recorder()
            .create_product(new_product(&format!("P{:03}", i), 10 + i))
            .await
            .unwrap();
    }

    let report = manager.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.uploaded, 25);
    assert_eq!(report.upload.conflicts, 0);
    assert!(report.download.checkpoint.is_some());

    let status = manager.status().await.unwrap();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.conflict_count, 0);
    assert!(db.products().unsynced().await.unwrap().is_empty());

    let product = db.products().get_by_code("P007").await.unwrap().unwrap();
    assert!(product.server_id.is_some());
    assert_eq!(product.stock, 17);
}

#[tokio::test]
async fn test_second_register_with_same_code_conflicts() {
    let harness = start_server().await;
    let (db_a, register_a) = register(&harness).await;
    let (db_b, register_b) = register(&harness).await;

    db_a.recorder().create_product(new_product("X1", 10)).await.unwrap();
    let theirs = db_b.recorder().create_product(new_product("X1", 3)).await.unwrap();

    register_a.sync(SyncTrigger::Manual).await.unwrap();
    let report = register_b.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.conflicts, 1);
    assert_eq!(report.upload.uploaded, 0);

    // B keeps its own copy, unsynced and parked.
    let local = db_b.products().get(&theirs.local_id).await.unwrap().unwrap();
    assert!(!local.synced);
    assert_eq!(local.stock, 3);

    let conflicts = db_b.sync_queue().conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].conflict_reason.as_deref(),
        Some("Product code already exists")
    );

    // The next cycle does not retry it.
    let again = register_b.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(again.upload.batches, 0);
}

#[tokio::test]
async fn test_download_is_idempotent() {
    let harness = start_server().await;
    let (db_a, register_a) = register(&harness).await;
    let (db_b, register_b) = register(&harness).await;

    db_a.recorder().create_product(new_product("LAC001", 30)).await.unwrap();
    register_a.sync(SyncTrigger::Manual).await.unwrap();

    let first = register_b.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(first.download.products_inserted, 1);

    let second = register_b.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(second.download.products_inserted, 0);
    assert_eq!(second.download.products_updated, 0);
    assert!(second.download.checkpoint >= first.download.checkpoint);

    let copies = db_b.products().list(&Default::default()).await.unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].code, "LAC001");
}

#[tokio::test]
async fn test_sale_upload_updates_server_stock() {
    let harness = start_server().await;
    let (db, manager) = register(&harness).await;

    let beb001 = db
        .recorder()
        .create_product(NewProduct {
            name: "Coca Cola 500ml".to_string(),
            code: "BEB001".to_string(),
            price_cents: 250,
            cost_cents: 180,
            stock: 45,
            min_stock: 10,
            category: Some("Bebidas".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    manager.sync(SyncTrigger::Manual).await.unwrap();

    let sale = db.recorder().create_sale(new_sale(&beb001.local_id, 3)).await.unwrap();
    assert_eq!(db.products().get(&beb001.local_id).await.unwrap().unwrap().stock, 42);

    let report = manager.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.uploaded, 1);
    assert!(db.sales().get(&sale.local_id).await.unwrap().unwrap().synced);

    // A fresh register sees the server's stock.
    let (db_b, register_b) = register(&harness).await;
    register_b.sync(SyncTrigger::Manual).await.unwrap();
    let mirrored = db_b.products().get_by_code("BEB001").await.unwrap().unwrap();
    assert_eq!(mirrored.stock, 42);
    assert!(db_b
        .sales()
        .get_by_sale_number(&sale.sale_number)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_restock_after_unsynced_sale_keeps_every_unit() {
    let harness = start_server().await;
    let (db, manager) = register(&harness).await;

    let beb001 = db.recorder().create_product(new_product("BEB001", 45)).await.unwrap();
    db.recorder().create_sale(new_sale(&beb001.local_id, 3)).await.unwrap();
    db.recorder().adjust_stock(&beb001.local_id, 10).await.unwrap();
    assert_eq!(db.products().get(&beb001.local_id).await.unwrap().unwrap().stock, 52);

    let report = manager.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.failed, 0);
    assert_eq!(report.upload.conflicts, 0);
    assert_eq!(report.upload.uploaded, 3);
    assert_eq!(manager.status().await.unwrap().pending_count, 0);

    let local = db.products().get(&beb001.local_id).await.unwrap().unwrap();
    assert!(local.synced);
    assert_eq!(local.stock, 52);

    let again = manager.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(again.upload.batches, 0);

    let (db_b, register_b) = register(&harness).await;
    register_b.sync(SyncTrigger::Manual).await.unwrap();
    let mirrored = db_b.products().get_by_code("BEB001").await.unwrap().unwrap();
    assert_eq!(mirrored.stock, 52);
}

#[tokio::test]
async fn test_offline_edit_conflicts_with_another_registers_sale() {
    let harness = start_server().await;
    let (db_a, register_a) = register(&harness).await;
    let (db_b, register_b) = register(&harness).await;

    let lac001 = db_a.recorder().create_product(new_product("LAC001", 10)).await.unwrap();
    register_a.sync(SyncTrigger::Manual).await.unwrap();

    // A reprices while offline.
    db_a.recorder()
        .update_product(
            &lac001.local_id,
            ProductUpdate {
                price_cents: Some(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // B sells from its downloaded copy and syncs first.
    register_b.sync(SyncTrigger::Manual).await.unwrap();
    let theirs = db_b.products().get_by_code("LAC001").await.unwrap().unwrap();
    db_b.recorder().create_sale(new_sale(&theirs.local_id, 3)).await.unwrap();
    let sold = register_b.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(sold.upload.uploaded, 1);

    let report = register_a.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.conflicts, 1);
    assert_eq!(report.upload.uploaded, 0);

    let conflicts = db_a.sync_queue().conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_reason.as_deref(), Some(reasons::SERVER_NEWER));
    let server_side: serde_json::Value =
        serde_json::from_str(conflicts[0].server_data.as_deref().unwrap()).unwrap();
    assert_eq!(server_side["stock"], serde_json::json!(7));

    // The server kept B's sale.
    let (db_c, register_c) = register(&harness).await;
    register_c.sync(SyncTrigger::Manual).await.unwrap();
    let mirrored = db_c.products().get_by_code("LAC001").await.unwrap().unwrap();
    assert_eq!(mirrored.stock, 7);
    assert_eq!(mirrored.price_cents, 250);
}

#[tokio::test]
async fn test_edit_after_sync_reaches_the_server() {
    let harness = start_server().await;
    let (db_a, register_a) = register(&harness).await;

    let product = db_a.recorder().create_product(new_product("PAN001", 20)).await.unwrap();
    register_a.sync(SyncTrigger::Manual).await.unwrap();

    db_a.recorder()
        .update_product(
            &product.local_id,
            ProductUpdate {
                price_cents: Some(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let report = register_a.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.uploaded, 1);
    assert_eq!(report.upload.conflicts, 0);

    let (db_b, register_b) = register(&harness).await;
    register_b.sync(SyncTrigger::Manual).await.unwrap();
    let mirrored = db_b.products().get_by_code("PAN001").await.unwrap().unwrap();
    assert_eq!(mirrored.price_cents, 300);
}

#[tokio::test]
async fn test_cash_session_round_trip() {
    let harness = start_server().await;
    let (db, manager) = register(&harness).await;

    let session = db
        .recorder()
        .open_cash_session("cashier-1", 10_000, None)
        .await
        .unwrap();
    manager.sync(SyncTrigger::Manual).await.unwrap();

    db.recorder()
        .close_cash_session(&session.local_id, 10_000, Some("sin novedades".to_string()))
        .await
        .unwrap();
    let report = manager.sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.upload.uploaded, 1);

    let stored = db.cash_sessions().get(&session.local_id).await.unwrap().unwrap();
    assert!(stored.synced);
    assert!(stored.server_id.is_some());
}

#[tokio::test]
async fn test_wrong_token_is_fatal_and_leaves_queue() {
    let harness = start_server().await;
    let settings = ServerSettings {
        auth_token: Some("forged".to_string()),
        ..harness.settings.clone()
    };
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let manager = SyncManager::builder(db.clone(), Arc::new(HttpSyncApi::new(&settings).unwrap()))
        .build();

    db.recorder().create_product(new_product("Z1", 1)).await.unwrap();
    let result = manager.sync(SyncTrigger::Manual).await;

    assert!(matches!(result, Err(SyncError::Unauthorized(_))));
    let pending = manager.status().await.unwrap().pending_count;
    assert_eq!(pending, 1);
}
