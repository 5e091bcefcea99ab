//! In-memory server double and fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minisuper_core::protocol::{
    ConflictItem, DownloadData, DownloadQuery, DownloadResponse, DownloadStatistics, EntityResults,
    ProductPayload, SaleItemPayload, SalePayload, UploadRequest, UploadResponse, UploadResults,
};
use minisuper_core::{NewProduct, NewSale, NewSaleItem, PaymentMethod, SaleStatus, SyncAction};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::api::SyncApi;
use crate::error::{SyncError, SyncResult};

/// Accepts everything except configured failures and conflicts.
#[derive(Default)]
pub(crate) struct FakeApi {
    failing: Mutex<HashSet<String>>,
    conflicting_codes: Mutex<HashSet<String>>,
    upload_error: Mutex<Option<fn() -> SyncError>>,
    delay: Mutex<Option<Duration>>,
    uploads: Mutex<Vec<UploadRequest>>,
    downloads: Mutex<Vec<DownloadQuery>>,
    products: Mutex<Vec<ProductPayload>>,
    sales: Mutex<Vec<SalePayload>>,
}

impl FakeApi {
    pub fn fail_local_id(&self, local_id: &str) {
        self.failing.lock().unwrap().insert(local_id.to_string());
    }

    pub fn conflict_code(&self, code: &str) {
        self.conflicting_codes.lock().unwrap().insert(code.to_string());
    }

    pub fn fail_uploads_with(&self, make: fn() -> SyncError) {
        *self.upload_error.lock().unwrap() = Some(make);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn serve_products(&self, products: Vec<ProductPayload>) {
        *self.products.lock().unwrap() = products;
    }

    pub fn serve_sales(&self, sales: Vec<SalePayload>) {
        *self.sales.lock().unwrap() = sales;
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<DownloadQuery> {
        self.downloads.lock().unwrap().clone()
    }

    fn outcome(&self, results: &mut EntityResults, local_id: &str, code: Option<&str>) {
        if self.failing.lock().unwrap().contains(local_id) {
            results.record_failed(local_id, "simulated failure");
        } else if code.is_some_and(|c| self.conflicting_codes.lock().unwrap().contains(c)) {
            results.record_conflict(ConflictItem {
                local_id: local_id.to_string(),
                server_id: Some("srv-existing".to_string()),
                reason: "Product code already exists".to_string(),
                data: Some(serde_json::json!({ "code": code })),
                server_data: None,
                client_data: None,
            });
        } else {
            results.record_applied(local_id, &format!("srv-{}", local_id));
        }
    }
}

#[async_trait]
impl SyncApi for FakeApi {
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(make) = *self.upload_error.lock().unwrap() {
            return Err(make());
        }
        self.uploads.lock().unwrap().push(request.clone());

        let mut results = UploadResults::default();
        for p in &request.products {
            self.outcome(&mut results.products, &p.local_id, Some(&p.code));
        }
        for s in &request.sales {
            self.outcome(&mut results.sales, &s.local_id, None);
        }
        for c in &request.cash_sessions {
            self.outcome(&mut results.cash_sessions, &c.local_id, None);
        }

        Ok(UploadResponse {
            success: true,
            results,
            sync_timestamp: Utc::now(),
        })
    }

    async fn download(&self, query: &DownloadQuery) -> SyncResult<DownloadResponse> {
        self.downloads.lock().unwrap().push(query.clone());
        let products = self.products.lock().unwrap().clone();
        let sales = self.sales.lock().unwrap().clone();
        let now = Utc::now();

        Ok(DownloadResponse {
            success: true,
            statistics: DownloadStatistics {
                products_count: products.len(),
                sales_count: sales.len(),
                last_sync_timestamp: query.last_sync_timestamp,
                new_sync_timestamp: now,
            },
            data: DownloadData {
                products,
                sales,
                sync_timestamp: now,
            },
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub(crate) fn beb001() -> NewProduct {
    NewProduct {
        name: "Coca Cola 500ml".to_string(),
        code: "BEB001".to_string(),
        price_cents: 250,
        cost_cents: 180,
        stock: 45,
        min_stock: 10,
        category: Some("Bebidas".to_string()),
        ..Default::default()
    }
}

pub(crate) fn product(code: &str) -> NewProduct {
    NewProduct {
        name: format!("Producto {}", code),
        code: code.to_string(),
        price_cents: 100,
        stock: 100,
        ..Default::default()
    }
}

pub(crate) fn sale_of(product_local_id: &str, quantity: i64) -> NewSale {
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

fn fixed_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn server_product(server_id: &str, code: &str, stock: i64) -> ProductPayload {
    ProductPayload {
        id: server_id.to_string(),
        local_id: String::new(),
        name: format!("Server {}", code),
        code: code.to_string(),
        barcode: None,
        price: 300,
        cost: 200,
        stock,
        min_stock: 0,
        max_stock: None,
        category: None,
        brand: None,
        description: None,
        unit: "unidad".to_string(),
        image: None,
        active: true,
        last_modified: fixed_time(),
        action: SyncAction::Update,
    }
}

pub(crate) fn server_sale(server_id: &str, sale_number: &str, product_id: &str) -> SalePayload {
    SalePayload {
        id: server_id.to_string(),
        local_id: String::new(),
        sale_number: sale_number.to_string(),
        date: fixed_time(),
        subtotal: 600,
        tax: 72,
        discount: 0,
        total: 672,
        payment_method: PaymentMethod::Card,
        user_id: "cashier-2".to_string(),
        customer_id: None,
        cash_session_local_id: None,
        notes: None,
        status: SaleStatus::Completed,
        items: vec![SaleItemPayload {
            product_id: product_id.to_string(),
            product_local_id: None,
            product_code: "LAC001".to_string(),
            product_name: "Leche".to_string(),
            quantity: 2,
            unit_price: 300,
            discount: 0,
            subtotal: 600,
        }],
        last_modified: fixed_time(),
        action: SyncAction::Create,
    }
}
