//! Penny Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pipelines that collect penny-item listings and reconcile contributed
//! sightings into one validated list.
//!
//! # Pipelines
//!
//! - **Staging warmer** ([`warmer`]): fetch every partition of the upstream
//!   listings API, normalize, dedupe, and write new items to staging
//! - **Consolidation** ([`consolidate`]): merge the current list, contributor
//!   exports, and the verified backup into one fill-only output
//! - **Purchase history** ([`purchase_history`]): turn receipt exports into
//!   sheet rows for penny-priced purchases
//!
//! # Example
//!
//! ```no_run
//! use penny_ingest::config::HarvestConfig;
//! use penny_ingest::fetch::PartitionFetcher;
//! use penny_ingest::storage::PgStagingStore;
//! use penny_ingest::warmer::StagingWarmer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HarvestConfig::from_env(true)?;
//!     let fetcher = PartitionFetcher::new(config.fetch.clone(), &config.credentials)?;
//!     let store = Arc::new(PgStagingStore::connect(&config.store).await?);
//!     let summary = StagingWarmer::new(fetcher, store, config.store).run().await;
//!     println!("{}", serde_json::to_string_pretty(&summary)?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consolidate;
pub mod error;
pub mod export;
pub mod fetch;
pub mod identity;
pub mod normalize;
pub mod prune;
pub mod purchase_history;
pub mod reconcile;
pub mod storage;
pub mod summary;
pub mod verified;
pub mod warmer;

pub use error::{HarvestError, Result};
pub use summary::{RunCounts, RunSummary, Stage};
