//! HTTP-level tests against an in-process server.

use std::sync::Arc;

use chrono::{Duration, Utc};
use minisuper_core::protocol::{
    reasons, DownloadResponse, ProductPayload, SaleItemPayload, SalePayload, UploadRequest,
    UploadResponse,
};
use minisuper_core::{PaymentMethod, SaleStatus, SyncAction};
use minisuper_server::{serve, AppState, ServerConfig};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    base: String,
    token: String,
    state: Arc<AppState>,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let state = AppState::connect(ServerConfig::in_memory("test-secret"))
            .await
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(serve(listener, state.clone(), async {
            let _ = rx.await;
        }));

        let token = state
            .issue_token("cashier-1", "caja1@minisuper.local", "CASHIER")
            .unwrap();

        TestServer {
            base,
            token,
            state,
            client: reqwest::Client::new(),
            _shutdown: tx,
        }
    }

    async fn upload(&self, request: &UploadRequest) -> UploadResponse {
        self.upload_as(&self.token, request).await
    }

    async fn upload_as(&self, token: &str, request: &UploadRequest) -> UploadResponse {
        let response = self
            .client
            .post(format!("{}/sync/upload", self.base))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    async fn download(&self, query: &[(&str, String)]) -> DownloadResponse {
        let response = self
            .client
            .get(format!("{}/sync/download", self.base))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }
}

fn product(local_id: &str, code: &str, stock: i64) -> ProductPayload {
    ProductPayload {
        id: String::new(),
        local_id: local_id.to_string(),
        name: format!("Producto {}", code),
        code: code.to_string(),
        barcode: None,
        price: 250,
        cost: 180,
        stock,
        min_stock: 5,
        max_stock: None,
        category: Some("Bebidas".to_string()),
        brand: None,
        description: None,
        unit: "unidad".to_string(),
        image: None,
        active: true,
        last_modified: Utc::now(),
        action: SyncAction::Create,
    }
}

fn sale(local_id: &str, number: &str, code: &str, quantity: i64) -> SalePayload {
    let now = Utc::now();
    SalePayload {
        id: String::new(),
        local_id: local_id.to_string(),
        sale_number: number.to_string(),
        date: now,
        subtotal: 250 * quantity,
        tax: 30 * quantity,
        discount: 0,
        total: 280 * quantity,
        payment_method: PaymentMethod::Cash,
        user_id: "cashier-1".to_string(),
        customer_id: None,
        cash_session_local_id: None,
        notes: None,
        status: SaleStatus::Completed,
        items: vec![SaleItemPayload {
            product_id: String::new(),
            product_local_id: None,
            product_code: code.to_string(),
            product_name: format!("Producto {}", code),
            quantity,
            unit_price: 250,
            discount: 0,
            subtotal: 250 * quantity,
        }],
        last_modified: now,
        action: SyncAction::Create,
    }
}

fn products(items: Vec<ProductPayload>) -> UploadRequest {
    UploadRequest {
        products: items,
        ..Default::default()
    }
}

fn from_register(register_id: &str, items: Vec<ProductPayload>) -> UploadRequest {
    UploadRequest {
        register_id: Some(register_id.to_string()),
        ..products(items)
    }
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let server = TestServer::start().await;
    let response = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_401() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(format!("{}/sync/upload", server.base))
        .json(&UploadRequest::default())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("authorization"));

    let response = server
        .client
        .get(format!("{}/sync/download", server.base))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(format!("{}/sync/upload", server.base))
        .bearer_auth(&server.token)
        .header("content-type", "application/json")
        .body(r#"{"products": [{"name": 5}]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_duplicate_code_from_another_register_conflicts() {
    let server = TestServer::start().await;

    let first = server.upload(&products(vec![product("reg-a-1", "X1", 10)])).await;
    assert_eq!(first.results.products.applied.len(), 1);
    let server_id = first.results.products.applied[0].server_id.clone();

    let second = server.upload(&products(vec![product("reg-b-1", "X1", 3)])).await;
    assert!(second.results.products.applied.is_empty());
    let conflict = &second.results.products.conflicts[0];
    assert_eq!(conflict.local_id, "reg-b-1");
    assert_eq!(conflict.reason, reasons::PRODUCT_CODE_EXISTS);
    assert_eq!(conflict.server_id.as_deref(), Some(server_id.as_str()));
    assert_eq!(conflict.data.as_ref().unwrap()["code"], json!("X1"));
}

#[tokio::test]
async fn test_replayed_create_returns_the_same_id() {
    let server = TestServer::start().await;
    let item = product("reg-a-1", "BEB001", 45);

    let first = server.upload(&products(vec![item.clone()])).await;
    let again = server.upload(&products(vec![item])).await;

    assert!(again.results.products.conflicts.is_empty());
    assert_eq!(
        first.results.products.applied[0].server_id,
        again.results.products.applied[0].server_id
    );
}

#[tokio::test]
async fn test_stale_update_returns_both_versions() {
    let server = TestServer::start().await;
    let created = server
        .upload(&from_register("reg-a", vec![product("reg-a-1", "LAC001", 30)]))
        .await;
    let server_id = created.results.products.applied[0].server_id.clone();

    // Register A edits offline.
    let mut older = product("reg-a-1", "LAC001", 25);
    older.id = server_id.clone();
    older.action = SyncAction::Update;

    // Register B's edit reaches the server first.
    let mut newer = product("reg-b-7", "LAC001", 28);
    newer.id = server_id;
    newer.action = SyncAction::Update;
    let applied = server.upload(&from_register("reg-b", vec![newer])).await;
    assert_eq!(applied.results.products.applied.len(), 1);

    let rejected = server.upload(&from_register("reg-a", vec![older])).await;

    let conflict = &rejected.results.products.conflicts[0];
    assert_eq!(conflict.reason, reasons::SERVER_NEWER);
    assert_eq!(conflict.server_data.as_ref().unwrap()["stock"], json!(28));
    assert_eq!(conflict.client_data.as_ref().unwrap()["stock"], json!(25));
}

#[tokio::test]
async fn test_foreign_sale_makes_an_older_edit_stale() {
    let server = TestServer::start().await;
    let created = server
        .upload(&from_register("reg-a", vec![product("reg-a-1", "LAC001", 10)]))
        .await;
    let server_id = created.results.products.applied[0].server_id.clone();

    let mut repriced = product("reg-a-1", "LAC001", 10);
    repriced.id = server_id;
    repriced.price = 300;
    repriced.action = SyncAction::Update;

    let sold = server
        .upload(&UploadRequest {
            register_id: Some("reg-b".to_string()),
            sales: vec![sale("reg-b-s1", "V-20241019-0001", "LAC001", 3)],
            ..Default::default()
        })
        .await;
    assert_eq!(sold.results.sales.applied.len(), 1);

    let response = server.upload(&from_register("reg-a", vec![repriced])).await;
    let conflict = &response.results.products.conflicts[0];
    assert_eq!(conflict.reason, reasons::SERVER_NEWER);
    assert_eq!(conflict.server_data.as_ref().unwrap()["stock"], json!(7));
    assert_eq!(conflict.client_data.as_ref().unwrap()["price"], json!(300));

    let download = server.download(&[]).await;
    assert_eq!(download.data.products[0].stock, 7);
    assert_eq!(download.data.products[0].price, 250);
}

#[tokio::test]
async fn test_own_sale_does_not_make_a_later_edit_stale() {
    let server = TestServer::start().await;
    let created = server
        .upload(&from_register("reg-a", vec![product("reg-a-1", "BEB001", 45)]))
        .await;
    let server_id = created.results.products.applied[0].server_id.clone();

    // Sold 3, then restocked 10, both before the sale was uploaded.
    let mut restocked = product("reg-a-1", "BEB001", 52);
    restocked.id = server_id;
    restocked.action = SyncAction::Update;
    server
        .upload(&UploadRequest {
            register_id: Some("reg-a".to_string()),
            sales: vec![sale("reg-a-s1", "V-20241019-0001", "BEB001", 3)],
            ..Default::default()
        })
        .await;

    let response = server.upload(&from_register("reg-a", vec![restocked])).await;
    assert_eq!(response.results.products.applied.len(), 1);
    assert!(response.results.products.conflicts.is_empty());

    let download = server.download(&[]).await;
    assert_eq!(download.data.products[0].stock, 52);
}

#[tokio::test]
async fn test_update_of_unknown_product_conflicts() {
    let server = TestServer::start().await;
    let mut item = product("reg-a-1", "GHOST", 1);
    item.action = SyncAction::Update;

    let response = server.upload(&products(vec![item])).await;
    assert_eq!(
        response.results.products.conflicts[0].reason,
        reasons::PRODUCT_NOT_FOUND
    );
}

#[tokio::test]
async fn test_sale_decrements_stock_floored_at_zero() {
    let server = TestServer::start().await;
    server
        .upload(&products(vec![product("p1", "BEB001", 45), product("p2", "PAN001", 2)]))
        .await;

    let response = server
        .upload(&UploadRequest {
            sales: vec![
                sale("s1", "V-20241019-0001", "BEB001", 3),
                sale("s2", "V-20241019-0002", "PAN001", 5),
            ],
            ..Default::default()
        })
        .await;
    assert_eq!(response.results.sales.applied.len(), 2);

    let download = server.download(&[]).await;
    let stock = |code: &str| {
        download
            .data
            .products
            .iter()
            .find(|p| p.code == code)
            .map(|p| p.stock)
    };
    assert_eq!(stock("BEB001"), Some(42));
    assert_eq!(stock("PAN001"), Some(0));
    assert_eq!(download.data.sales.len(), 2);
}

#[tokio::test]
async fn test_product_created_with_its_first_sale_in_one_request() {
    let server = TestServer::start().await;
    let new_product = product("p1", "BEB001", 45);
    let first_sale = sale("s1", "V-20241019-0001", "BEB001", 3);

    // Products are applied before the sales in the same request.
    let response = server
        .upload(&UploadRequest {
            products: vec![new_product],
            sales: vec![first_sale],
            ..Default::default()
        })
        .await;

    assert_eq!(response.results.products.applied.len(), 1);
    assert_eq!(response.results.sales.applied.len(), 1);
}

#[tokio::test]
async fn test_sale_with_unknown_product_fails_without_side_effects() {
    let server = TestServer::start().await;
    let response = server
        .upload(&UploadRequest {
            sales: vec![sale("s1", "V-20241019-0001", "NOPE", 1)],
            ..Default::default()
        })
        .await;

    assert_eq!(response.results.sales.errors, 1);
    assert!(response.results.sales.failed[0].error.contains("NOPE"));
    assert!(server.download(&[]).await.data.sales.is_empty());
}

#[tokio::test]
async fn test_duplicate_sale_number_conflicts() {
    let server = TestServer::start().await;
    server.upload(&products(vec![product("p1", "BEB001", 45)])).await;
    server
        .upload(&UploadRequest {
            sales: vec![sale("s1", "V-20241019-0001", "BEB001", 1)],
            ..Default::default()
        })
        .await;

    let response = server
        .upload(&UploadRequest {
            sales: vec![sale("other-register", "V-20241019-0001", "BEB001", 1)],
            ..Default::default()
        })
        .await;
    assert_eq!(
        response.results.sales.conflicts[0].reason,
        reasons::SALE_NUMBER_EXISTS
    );
}

#[tokio::test]
async fn test_cancelling_a_sale_restores_stock() {
    let server = TestServer::start().await;
    server.upload(&products(vec![product("p1", "BEB001", 45)])).await;
    let created = server
        .upload(&UploadRequest {
            sales: vec![sale("s1", "V-20241019-0001", "BEB001", 3)],
            ..Default::default()
        })
        .await;

    let mut cancelled = sale("s1", "V-20241019-0001", "BEB001", 3);
    cancelled.id = created.results.sales.applied[0].server_id.clone();
    cancelled.status = SaleStatus::Cancelled;
    cancelled.action = SyncAction::Update;
    cancelled.last_modified = Utc::now() + Duration::seconds(1);
    let response = server
        .upload(&UploadRequest {
            sales: vec![cancelled],
            ..Default::default()
        })
        .await;
    assert_eq!(response.results.sales.applied.len(), 1);

    let download = server.download(&[]).await;
    assert_eq!(download.data.products[0].stock, 45);
    assert_eq!(download.data.sales[0].status, SaleStatus::Cancelled);
}

#[tokio::test]
async fn test_download_filters_by_checkpoint_and_owner() {
    let server = TestServer::start().await;
    server.upload(&products(vec![product("p1", "BEB001", 45)])).await;

    let other = server
        .state
        .issue_token("cashier-2", "caja2@minisuper.local", "CASHIER")
        .unwrap();
    let mut their_sale = sale("s9", "V-20241019-0009", "BEB001", 1);
    their_sale.user_id = "cashier-2".to_string();
    server
        .upload_as(
            &other,
            &UploadRequest {
                sales: vec![their_sale],
                ..Default::default()
            },
        )
        .await;

    let everything = server.download(&[]).await;
    assert_eq!(everything.statistics.products_count, 1);
    assert_eq!(everything.statistics.sales_count, 1);

    let own = server
        .download(&[("includeOwnSalesOnly", "true".to_string())])
        .await;
    assert!(own.data.sales.is_empty());

    let checkpoint = everything.statistics.new_sync_timestamp;
    let nothing_new = server
        .download(&[("lastSyncTimestamp", checkpoint.to_rfc3339())])
        .await;
    assert!(nothing_new.data.products.is_empty());
    assert!(nothing_new.data.sales.is_empty());
    assert_eq!(nothing_new.statistics.last_sync_timestamp, Some(checkpoint));
}

#[tokio::test]
async fn test_soft_delete_is_downloaded_inactive() {
    let server = TestServer::start().await;
    let created = server.upload(&products(vec![product("p1", "BEB001", 45)])).await;

    let mut deleted = product("p1", "BEB001", 45);
    deleted.id = created.results.products.applied[0].server_id.clone();
    deleted.active = false;
    deleted.action = SyncAction::Delete;
    deleted.last_modified = Utc::now() + Duration::seconds(1);
    server.upload(&products(vec![deleted])).await;

    let download = server.download(&[]).await;
    assert!(!download.data.products[0].active);
    assert_eq!(download.data.products[0].action, SyncAction::Delete);
}
