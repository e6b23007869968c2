//! Fetch-stage behavior against a mocked upstream API
//!
//! Covers request shape, per-partition diagnostics, and the aggregate
//! failure hint when every partition comes back empty.

mod common;

use common::{
    closed_port_uri, fetcher, fetcher_at, init_tracing, store_config, TEST_COOKIE, TEST_GUILD,
};
use penny_ingest::fetch::{FailureHint, FetchErrorKind, HeuristicClassifier, PartitionOutcome};
use penny_ingest::storage::InMemoryStagingStore;
use penny_ingest::summary::Stage;
use penny_ingest::warmer::StagingWarmer;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_request_carries_partition_and_auth() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/penny-items"))
        .and(query_param("zip_code", "30301"))
        .and(query_param("guildId", TEST_GUILD))
        .and(query_param("experimental", "true"))
        .and(query_param("include_out_of_stock", "false"))
        .and(header("X-Guild-Id", TEST_GUILD))
        .and(header("Cookie", TEST_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"store_sku": "123456", "item_name": "Drill"},
            {"store_sku": "654321", "item_name": "Saw"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (items, result) = fetcher(&server, &["30301"]).fetch_partition("30301").await;

    assert_eq!(items.len(), 2);
    assert_eq!(result.http_status, Some(200));
    assert_eq!(result.item_count, 2);
    assert_eq!(result.outcome(), PartitionOutcome::SuccessWithItems);
}

#[tokio::test]
async fn test_all_empty_partitions_fail_fetch_with_no_data_hint() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/penny-items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryStagingStore::new());
    let warmer = StagingWarmer::new(
        fetcher(&server, &["30301", "30302", "30303"]),
        store.clone(),
        store_config(100, 10),
    );
    let summary = warmer.run().await;

    assert!(!summary.ok);
    assert_eq!(summary.stage, Some(Stage::Fetch));
    assert_eq!(summary.hint, Some(FailureHint::NoData));
    assert_eq!(summary.diagnostics.len(), 3);
    assert!(summary
        .diagnostics
        .iter()
        .all(|d| d.outcome() == PartitionOutcome::SuccessEmpty));
    assert!(store.staged().is_empty());

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["ok"], json!(false));
    assert_eq!(json["stage"], json!("fetch"));
    assert_eq!(json["hint"], json!("no-data"));
}

#[tokio::test]
async fn test_challenge_page_wins_over_ordinary_errors() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("zip_code", "30301"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "upstream"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("zip_code", "30302"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_raw("<html><title>Just a moment...</title></html>", "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("zip_code", "30303"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let report = fetcher(&server, &["30301", "30302", "30303"]).fetch_all().await;

    assert_eq!(report.total_items(), 0);
    assert_eq!(report.results[0].error, Some(FetchErrorKind::Http(500)));
    assert_eq!(report.results[1].error, Some(FetchErrorKind::BotChallenge));
    assert!(report.results[1].looks_like_html);
    assert_eq!(report.results[2].error, Some(FetchErrorKind::Http(401)));

    let err = report.ensure_items(&HeuristicClassifier).unwrap_err();
    assert!(matches!(
        err,
        penny_ingest::HarvestError::NoItems {
            hint: FailureHint::BotBlock
        }
    ));
    assert!(err.to_string().contains("Cloudflare"));
}

#[tokio::test]
async fn test_unauthorized_everywhere_is_auth_failure() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let report = fetcher(&server, &["30301", "30302"]).fetch_all().await;
    let err = report.ensure_items(&HeuristicClassifier).unwrap_err();
    assert!(matches!(
        err,
        penny_ingest::HarvestError::NoItems {
            hint: FailureHint::AuthFailure
        }
    ));
}

#[tokio::test]
async fn test_malformed_json_keeps_snippet() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
        .mount(&server)
        .await;

    let (items, result) = fetcher(&server, &["30301"]).fetch_partition("30301").await;
    assert!(items.is_empty());
    assert_eq!(result.error, Some(FetchErrorKind::JsonDecode));
    assert_eq!(result.response_snippet.as_deref(), Some("{not json"));
}

#[tokio::test]
async fn test_snippet_never_leaks_cookie() {
    init_tracing();
    let server = MockServer::start().await;

    let echoed = format!("<html>Attention Required! your cookie was {}</html>", TEST_COOKIE);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_raw(echoed, "text/html"))
        .mount(&server)
        .await;

    let (_, result) = fetcher(&server, &["30301"]).fetch_partition("30301").await;
    let snippet = result.response_snippet.unwrap();
    assert!(!snippet.contains("s3cr3t-token"));
    assert_eq!(result.error, Some(FetchErrorKind::BotChallenge));
}

#[tokio::test]
async fn test_unreachable_upstream_is_network_failure() {
    init_tracing();
    let fetcher = fetcher_at(&closed_port_uri(), &["30301"]);

    let report = fetcher.fetch_all().await;
    assert!(matches!(
        report.results[0].error,
        Some(FetchErrorKind::Network(_))
    ));
    let err = report.ensure_items(&HeuristicClassifier).unwrap_err();
    assert!(matches!(
        err,
        penny_ingest::HarvestError::NoItems {
            hint: FailureHint::NetworkFailure
        }
    ));
}
