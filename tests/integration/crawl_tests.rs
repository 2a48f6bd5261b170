//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run full
//! crawls against a SQLite database in a temporary directory.

use listing_finder::config::{parse_config, Config, EgressConfig};
use listing_finder::crawler::{Fetcher, Orchestrator, RetryPolicy};
use listing_finder::egress::HttpEgressAuthorizer;
use listing_finder::sites::{KleinanzeigenAdapter, SiteAdapter};
use listing_finder::storage::{RunStatus, SqliteListingStore};
use listing_finder::ListingSource;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with the database inside `dir`
fn create_test_config(dir: &Path) -> Config {
    let content = format!(
        r#"
[database]
path = "{}"
max-retries = 2
retry-delay-ms = 10

[methods.http]
backend = "http"
timeout-ms = 2000
max-retries = 2
retry-delay-ms = 0
max-workers = 3

[sites.kleinanzeigen]
method = "http"
locations = ["3331"]
"#,
        dir.join("listings.db").display()
    );
    parse_config(&content).expect("test config should be valid")
}

fn results_page(total: u32, ids: &[&str]) -> String {
    let articles: String = ids
        .iter()
        .map(|id| format!(r#"<li><article data-adid="{}"></article></li>"#, id))
        .collect();
    format!(
        r#"<html><body>
        <span class="breadcrump-summary">1 - 25 von {} Ergebnissen</span>
        <ul id="srchrslt-adtable">{}</ul>
        </body></html>"#,
        total, articles
    )
}

const EMPTY_PAGE: &str = r#"<html><body>
    <span class="breadcrump-summary">Es wurden keine Ergebnisse gefunden</span>
    </body></html>"#;

async fn mount_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_empty_fallback(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .mount(server)
        .await;
}

/// Builds the orchestrator the binary would build, pointed at `server`
async fn setup(
    config: &Config,
    server: &MockServer,
) -> (Orchestrator, Arc<SqliteListingStore>, Arc<Fetcher>) {
    let store = Arc::new(SqliteListingStore::open(&config.database).unwrap());
    let site = config.site(ListingSource::Kleinanzeigen).unwrap();
    let adapter: Arc<dyn SiteAdapter> = Arc::new(
        KleinanzeigenAdapter::new(site.locations.clone(), site.states.clone(), store.clone())
            .with_base_url(server.uri()),
    );
    let fetcher = Arc::new(
        Fetcher::for_site(config, ListingSource::Kleinanzeigen)
            .await
            .unwrap(),
    );
    let workers = config.method("http").unwrap().max_workers as usize;
    let orchestrator = Orchestrator::new(adapter, fetcher.clone(), store.clone(), workers);
    (orchestrator, store, fetcher)
}

fn count(db: &Path, table: &str) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_crawl_single_location() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let server = MockServer::start().await;

    // Category 203 has two pages; page 2 repeats one ad from page 1
    mount_page(
        &server,
        "/c203l3331",
        results_page(30, &["1001", "1002", "1003"]),
    )
    .await;
    mount_page(
        &server,
        "/seite:2/c203l3331",
        results_page(30, &["1003", "1004"]),
    )
    .await;
    mount_page(&server, "/c196l3331", results_page(1, &["2001"])).await;
    mount_empty_fallback(&server).await;

    let (orchestrator, store, fetcher) = setup(&config, &server).await;
    let run_id = store.start_run(ListingSource::Kleinanzeigen, "hash").await.unwrap();

    let summary = orchestrator.run().await.unwrap();
    fetcher.shutdown().await;
    store
        .finish_run(run_id, RunStatus::Completed, summary)
        .await
        .unwrap();

    // 4 categories, one location each, plus page 2 of category 203
    assert_eq!(summary.locations, 4);
    assert_eq!(summary.pages_attempted, 5);
    assert_eq!(summary.pages_failed, 0);

    let db = dir.path().join("listings.db");
    assert_eq!(count(&db, "property"), 5);
    assert_eq!(count(&db, "property_status"), 5);
    assert_eq!(count(&db, "property_seen"), 5);

    let run = store.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.pages_attempted, Some(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_first_page_skips_location() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let server = MockServer::start().await;

    // Both attempts at page 1 fail; page 2 must never be requested
    Mock::given(method("GET"))
        .and(path("/c203l3331"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/seite:2/c203l3331"))
        .respond_with(ResponseTemplate::new(200).set_body_string(results_page(30, &["9"])))
        .expect(0)
        .mount(&server)
        .await;
    mount_empty_fallback(&server).await;

    let (orchestrator, _store, _fetcher) = setup(&config, &server).await;
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_failed, 1);
    assert_eq!(count(&dir.path().join("listings.db"), "property"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/c203l3331"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/c203l3331", results_page(2, &["1", "2"])).await;
    mount_empty_fallback(&server).await;

    let (orchestrator, _store, _fetcher) = setup(&config, &server).await;
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.pages_failed, 0);
    assert_eq!(summary.listings_persisted, 2);
    assert_eq!(count(&dir.path().join("listings.db"), "property"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_crawl_keeps_one_row_per_listing() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let server = MockServer::start().await;

    mount_page(&server, "/c203l3331", results_page(2, &["1", "2"])).await;
    mount_empty_fallback(&server).await;

    let (orchestrator, _store, _fetcher) = setup(&config, &server).await;
    orchestrator.run().await.unwrap();

    let (orchestrator, _store, _fetcher) = setup(&config, &server).await;
    orchestrator.run().await.unwrap();

    let db = dir.path().join("listings.db");
    assert_eq!(count(&db, "property"), 2);
    assert_eq!(count(&db, "property_status"), 2);
    assert_eq!(count(&db, "property_seen"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_egress_authorized_for_fetcher_lifetime() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("192.0.2.10"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/allow"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/allow"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let authorizer = HttpEgressAuthorizer::new(&EgressConfig {
        ip_lookup_url: format!("{}/ip", server.uri()),
        endpoint: format!("{}/allow", server.uri()),
        timeout_ms: 2_000,
    })
    .unwrap();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let backend = listing_finder::crawler::build_backend(config.method("http").unwrap(), None)
        .unwrap();
    let fetcher = Fetcher::new(backend, RetryPolicy::once())
        .with_egress(Arc::new(authorizer))
        .await;

    fetcher.shutdown().await;
    // A second shutdown must not revoke again
    fetcher.shutdown().await;
}
