//! Worker over real HTTP: install against a live origin, then lose it.

use std::time::Duration;

use minisuper_cache::policy::{API_CACHE, PRECACHE_ROUTES};
use minisuper_cache::{CacheRequest, CacheWorker, ResponseSource, WorkerState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Not pooled, so dropping it really closes the port.
async fn origin() -> MockServer {
    let server = MockServer::builder().start().await;
    for route in PRECACHE_ROUTES {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("page {}", route)))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"success":true,"data":[{"code":"BEB001"}]}"#, "application/json"),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_shell_and_api_reads_survive_losing_the_origin() {
    let server = origin().await;
    let base = server.uri();
    let worker = CacheWorker::with_http(&base, Duration::from_secs(2)).unwrap();

    worker.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Activated);

    let api = CacheRequest::get(&format!("{}/api/products", base)).unwrap();
    let online = worker.handle_fetch(&api).await.unwrap().unwrap();
    assert_eq!(online.source, ResponseSource::Network);

    drop(server);

    let cached = worker.handle_fetch(&api).await.unwrap().unwrap();
    assert_eq!(cached.source, ResponseSource::Cache(API_CACHE.into()));
    assert!(cached.text().contains("BEB001"));

    let uncached_api = CacheRequest::get(&format!("{}/api/reports/daily", base)).unwrap();
    let offline = worker.handle_fetch(&uncached_api).await.unwrap().unwrap();
    assert_eq!(offline.status, 503);

    let unknown_page = CacheRequest::navigate(&format!("{}/dashboard/settings", base)).unwrap();
    let shell = worker.handle_fetch(&unknown_page).await.unwrap().unwrap();
    assert_eq!(shell.text(), "page /");
}

#[tokio::test]
async fn test_install_fails_when_origin_is_missing_a_route() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(3)
        .mount(&server)
        .await;

    let worker = CacheWorker::with_http(&server.uri(), Duration::from_secs(2)).unwrap();
    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(worker.storage().names().is_empty());
}
