//! Shared helpers for penny-ingest integration tests

#![allow(dead_code)]

use penny_ingest::config::{Credentials, FetchConfig, StoreConfig};
use penny_ingest::fetch::PartitionFetcher;
use std::time::Duration;
use wiremock::MockServer;

pub const TEST_COOKIE: &str = "session=s3cr3t-token";
pub const TEST_GUILD: &str = "42";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,penny_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn credentials() -> Credentials {
    Credentials {
        cookie: TEST_COOKIE.to_string(),
        guild_id: TEST_GUILD.to_string(),
    }
}

/// Fetch config pointed at the mock server with a minimal delay.
pub fn fetch_config(server: &MockServer, partitions: &[&str]) -> FetchConfig {
    fetch_config_at(&server.uri(), partitions)
}

pub fn fetch_config_at(base_uri: &str, partitions: &[&str]) -> FetchConfig {
    FetchConfig::default()
        .with_api_url(format!("{}/api/penny-items", base_uri))
        .with_partitions(partitions.iter().copied())
        .with_request_delay(Duration::from_millis(1))
        .with_timeout(Duration::from_secs(5))
}

pub fn fetcher(server: &MockServer, partitions: &[&str]) -> PartitionFetcher {
    fetcher_at(&server.uri(), partitions)
}

pub fn fetcher_at(base_uri: &str, partitions: &[&str]) -> PartitionFetcher {
    PartitionFetcher::new(fetch_config_at(base_uri, partitions), &credentials())
        .unwrap_or_else(|e| panic!("fetcher should build: {}", e))
}

/// Base URI of a local port that nothing listens on.
pub fn closed_port_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap_or_else(|e| panic!("bind should succeed: {}", e));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|e| panic!("local addr: {}", e));
    drop(listener);
    format!("http://{}", addr)
}

pub fn store_config(max_uniques: usize, batch_size: usize) -> StoreConfig {
    StoreConfig {
        batch_size,
        batch_pause: Duration::from_millis(0),
        max_uniques,
        ..StoreConfig::default()
    }
}
