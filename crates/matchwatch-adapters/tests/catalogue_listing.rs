use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{http::StatusCode, response::Html, routing::get, Router};
use matchwatch_adapters::{
    FixtureSource, HtmlListingSource, ListingRules, MatchSource, SourceError,
};
use matchwatch_core::MatchRecord;
use matchwatch_storage::{HttpClientConfig, HttpFetcher};
use tokio::net::TcpListener;
use uuid::Uuid;

fn sample_listing_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/catalogue/sample/listing.html")
}

fn expected_sample() -> Vec<MatchRecord> {
    vec![
        MatchRecord::new("rcsa", "olympique lyonnais"),
        MatchRecord::new("rcsa", "olympique lyonnais"),
        MatchRecord::new("stade rennais", "rcsa"),
        MatchRecord::new("rcsa", "fc nantes"),
    ]
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn http() -> HttpFetcher {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        user_agent: None,
    })
    .expect("client")
}

#[tokio::test]
async fn fixture_source_parses_sample_catalogue() {
    let source = FixtureSource::new(sample_listing_path(), ListingRules::default());
    let snapshot = source.fetch(Uuid::new_v4()).await.expect("fetch fixture");
    assert_eq!(snapshot.matches, expected_sample());
    assert!(snapshot.source_url.starts_with("file://"));
}

#[tokio::test]
async fn missing_fixture_is_reported_as_fixture_error() {
    let source = FixtureSource::new("/nonexistent/listing.html", ListingRules::default());
    let err = source.fetch(Uuid::new_v4()).await.expect_err("missing file");
    assert!(matches!(err, SourceError::Fixture { .. }));
    assert_eq!(err.kind(), "fixture");
    assert_eq!(err.to_string(), "reading fixture /nonexistent/listing.html");
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn html_source_fetches_and_parses_live_page() {
    let page = std::fs::read_to_string(sample_listing_path()).expect("read sample");
    let addr = serve(Router::new().route(
        "/fr/catalogue",
        get(move || {
            let page = page.clone();
            async move { Html(page) }
        }),
    ))
    .await;

    let url = format!("http://{addr}/fr/catalogue");
    let source = HtmlListingSource::new(http(), url.clone(), ListingRules::default());
    assert_eq!(source.source_url(), url);

    let snapshot = source.fetch(Uuid::new_v4()).await.expect("fetch");
    assert_eq!(snapshot.matches, expected_sample());
    assert_eq!(snapshot.source_url, url);
}

#[tokio::test]
async fn empty_catalogue_is_an_empty_snapshot() {
    let addr = serve(Router::new().route(
        "/fr/catalogue",
        get(|| async { Html("<html><body><p>Aucun match</p></body></html>") }),
    ))
    .await;
    let source = HtmlListingSource::new(
        http(),
        format!("http://{addr}/fr/catalogue"),
        ListingRules::default(),
    );
    let snapshot = source.fetch(Uuid::new_v4()).await.expect("fetch");
    assert!(snapshot.matches.is_empty());
}

#[tokio::test]
async fn server_error_is_a_transport_failure() {
    let addr = serve(Router::new().route(
        "/fr/catalogue",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    ))
    .await;
    let source = HtmlListingSource::new(
        http(),
        format!("http://{addr}/fr/catalogue"),
        ListingRules::default(),
    );
    let err = source.fetch(Uuid::new_v4()).await.expect_err("502");
    assert!(matches!(err, SourceError::Transport(_)));
    assert_eq!(err.kind(), "transport");
}
