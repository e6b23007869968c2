//! Staging persistence
//!
//! [`StagingStore`] is the seam between the pipelines and the external store.
//! [`BatchWriter`] chunks rows, writes the chunks one after another with a
//! short pause, and keeps going when a single chunk fails.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStagingStore;
pub use postgres::PgStagingStore;

use crate::error::Result;
use crate::normalize::CanonicalRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// Share of failed rows above which a run is reported as failed.
pub const HIGH_ERROR_RATE: f64 = 0.10;

/// A row of the enrichment staging table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingRow {
    pub sku: String,
    pub internet_number: Option<i64>,
    pub barcode_upc: Option<String>,
    pub item_name: Option<String>,
    pub brand: Option<String>,
    pub retail_price: Option<f64>,
    pub image_url: Option<String>,
    pub product_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StagingRow {
    pub fn from_record(record: &CanonicalRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            sku: record.sku.to_string(),
            internet_number: record.internet_number,
            barcode_upc: record.barcode_upc.clone(),
            item_name: record.item_name.clone(),
            brand: record.brand.clone(),
            retail_price: record.retail_price,
            image_url: record.image_url.clone(),
            product_link: record.product_link.clone(),
            created_at,
        }
    }
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Delete staging rows created before `cutoff`; returns how many.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// SKUs already present in the long-term public list.
    async fn existing_skus(&self) -> Result<HashSet<String>>;

    /// Upsert on `sku`. A stored non-null column is never replaced.
    async fn upsert_batch(&self, rows: &[StagingRow]) -> Result<u64>;
}

/// Outcome of writing every batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub batches: usize,
    pub failed_batches: usize,
    pub upserted: usize,
    pub failed: usize,
}

impl WriteStats {
    /// True when failed rows exceed [`HIGH_ERROR_RATE`] of the upserted rows.
    pub fn high_error_rate(&self) -> bool {
        self.failed as f64 > self.upserted as f64 * HIGH_ERROR_RATE
    }
}

pub struct BatchWriter {
    batch_size: usize,
    pause: Duration,
}

impl BatchWriter {
    /// Batches of at least one row.
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause,
        }
    }

    pub async fn write_all(&self, store: &dyn StagingStore, rows: &[StagingRow]) -> WriteStats {
        let mut stats = WriteStats::default();
        let total = rows.len().div_ceil(self.batch_size);

        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            stats.batches += 1;
            match store.upsert_batch(chunk).await {
                Ok(_) => {
                    stats.upserted += chunk.len();
                    if (i + 1) % 10 == 0 || i + 1 == total {
                        info!(
                            batch = i + 1,
                            total,
                            upserted = stats.upserted,
                            "Staging batches written"
                        );
                    }
                },
                Err(e) => {
                    warn!(batch = i + 1, total, rows = chunk.len(), error = %e, "Staging batch failed");
                    stats.failed_batches += 1;
                    stats.failed += chunk.len();
                },
            }

            if i + 1 < total {
                tokio::time::sleep(self.pause).await;
            }
        }

        stats
    }
}
