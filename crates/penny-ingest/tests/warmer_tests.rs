//! End-to-end staging warmer runs against a mocked upstream and the
//! in-memory staging store

mod common;

use chrono::{Duration, Utc};
use common::{fetcher, init_tracing, store_config};
use penny_ingest::identity::IdentityConfig;
use penny_ingest::storage::{InMemoryStagingStore, StagingRow};
use penny_ingest::summary::Stage;
use penny_ingest::warmer::StagingWarmer;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_partition(server: &MockServer, zip: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(query_param("zip_code", zip))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Two partitions exercising every admission filter:
/// raw repeat, invalid SKU, existing SKU, cross-store SKU repeat,
/// internet-number repeat, and the unique cap.
async fn mixed_upstream() -> MockServer {
    let server = MockServer::start().await;
    mount_partition(
        &server,
        "30301",
        json!([
            {"store_sku": "123456", "store_name": "Midtown", "internet_sku": 1001, "item_name": "Drill", "price": 2500},
            {"store_sku": "123456", "store_name": "Midtown", "item_name": "Drill"},
            {"store_sku": "234567", "store_name": "Midtown", "internet_sku": 1001, "item_name": "Drill kit"},
            {"store_sku": "345678", "store_name": "Midtown", "item_name": "Already listed"},
            {"store_sku": "12345", "store_name": "Midtown", "item_name": "Short SKU"}
        ]),
    )
    .await;
    mount_partition(
        &server,
        "30302",
        json!([
            {"store_sku": "123456", "store_name": "Buckhead", "image_url": "http://img/drill.jpg"},
            {"store_sku": "456789", "store_name": "Buckhead", "item_name": "Hammer"},
            {"store_sku": "567890", "store_name": "Buckhead", "item_name": "Level"}
        ]),
    )
    .await;
    server
}

#[tokio::test]
async fn test_warmer_filters_and_caps_admissions() {
    init_tracing();
    let server = mixed_upstream().await;
    let store = Arc::new(InMemoryStagingStore::new().with_existing(["345678"]));

    // Staging dedupes by SKU alone, whatever contributors are configured.
    let identity = IdentityConfig::default().with_regional_contributor("MIDTOWN", "Midtown crew");
    let warmer = StagingWarmer::new(
        fetcher(&server, &["30301", "30302"]),
        store.clone(),
        store_config(2, 10),
    )
    .with_identity(identity);
    let summary = warmer.run().await;

    assert!(summary.ok, "run failed: {:?}", summary.error);
    let c = &summary.counts;
    assert_eq!(c.partitions, 2);
    assert_eq!(c.fetched, 8);
    assert_eq!(c.raw_duplicates, 1);
    assert_eq!(c.invalid_skus, 1);
    assert_eq!(c.normalized, 6);
    assert_eq!(c.skipped_existing, 1);
    assert_eq!(c.sku_duplicates, 1);
    assert_eq!(c.internet_duplicates, 1);
    assert_eq!(c.over_cap, 1);
    assert_eq!(c.admitted, 2);
    assert_eq!(c.upserted, 2);
    assert_eq!(c.failed, 0);

    let staged = store.staged();
    let skus: Vec<&str> = staged.iter().map(|r| r.sku.as_str()).collect();
    assert_eq!(skus, vec!["123456", "456789"]);

    // Cross-store repeat filled the image without replacing anything.
    assert_eq!(staged[0].image_url.as_deref(), Some("http://img/drill.jpg"));
    assert_eq!(staged[0].internet_number, Some(1001));
    assert_eq!(staged[0].item_name.as_deref(), Some("Drill"));
}

#[tokio::test]
async fn test_warmer_prunes_before_admitting() {
    init_tracing();
    let server = MockServer::start().await;
    mount_partition(&server, "30301", json!([{"store_sku": "999999", "item_name": "Fresh"}])).await;

    let now = Utc::now();
    let old = |sku: &str, days: i64| StagingRow {
        sku: sku.to_string(),
        internet_number: None,
        barcode_upc: None,
        item_name: None,
        brand: None,
        retail_price: None,
        image_url: None,
        product_link: None,
        created_at: now - Duration::days(days),
    };
    let store = Arc::new(
        InMemoryStagingStore::new().with_rows(vec![old("111111", 90), old("222222", 10)]),
    );

    let summary = StagingWarmer::new(fetcher(&server, &["30301"]), store.clone(), store_config(100, 10))
        .run_at(now)
        .await;

    assert!(summary.ok);
    assert_eq!(summary.counts.pruned, 1);
    let skus: Vec<String> = store.staged().into_iter().map(|r| r.sku).collect();
    assert_eq!(skus, vec!["222222".to_string(), "999999".to_string()]);
}

#[tokio::test]
async fn test_store_side_failures_are_not_fatal() {
    init_tracing();
    let server = MockServer::start().await;
    mount_partition(&server, "30301", json!([{"store_sku": "123456"}, {"store_sku": "654321"}])).await;

    let store = Arc::new(InMemoryStagingStore::new().failing_prune().failing_existing());
    let summary = StagingWarmer::new(fetcher(&server, &["30301"]), store.clone(), store_config(100, 10))
        .run()
        .await;

    assert!(summary.ok);
    assert_eq!(summary.counts.pruned, 0);
    assert_eq!(summary.counts.skipped_existing, 0);
    assert_eq!(store.staged().len(), 2);
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_later_batches() {
    init_tracing();
    let server = MockServer::start().await;
    let items: Vec<serde_json::Value> = (0..6)
        .map(|i| json!({"store_sku": format!("{}", 100000 + i)}))
        .collect();
    mount_partition(&server, "30301", json!(items)).await;

    let store = Arc::new(InMemoryStagingStore::new().fail_batch(0));
    let summary = StagingWarmer::new(fetcher(&server, &["30301"]), store.clone(), store_config(100, 2))
        .run()
        .await;

    // 2 of 4 failed: above the 10% threshold
    assert!(!summary.ok);
    assert_eq!(summary.stage, Some(Stage::Persist));
    assert_eq!(summary.counts.failed, 2);
    assert_eq!(summary.counts.upserted, 4);
    assert!(summary.error.unwrap().contains("High error rate"));
    assert_eq!(store.staged().len(), 4);
}

#[tokio::test]
async fn test_nothing_new_is_success() {
    init_tracing();
    let server = MockServer::start().await;
    mount_partition(&server, "30301", json!([{"store_sku": "123456"}])).await;

    let store = Arc::new(InMemoryStagingStore::new().with_existing(["123456"]));
    let summary = StagingWarmer::new(fetcher(&server, &["30301"]), store.clone(), store_config(100, 10))
        .run()
        .await;

    assert!(summary.ok);
    assert_eq!(summary.counts.admitted, 0);
    assert!(store.staged().is_empty());
}
