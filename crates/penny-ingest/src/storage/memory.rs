//! In-memory staging store for dry runs and tests

use super::{StagingRow, StagingStore};
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InMemoryStagingStore {
    rows: Mutex<IndexMap<String, StagingRow>>,
    existing: HashSet<String>,
    upsert_calls: AtomicUsize,
    failing_batches: HashSet<usize>,
    fail_prune: bool,
    fail_existing: bool,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// SKUs reported as already present in the public list.
    pub fn with_existing<I, S>(mut self, skus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.existing = skus.into_iter().map(Into::into).collect();
        self
    }

    /// Seed staging rows as if written by an earlier run.
    pub fn with_rows(self, rows: Vec<StagingRow>) -> Self {
        {
            let mut guard = self.lock();
            for row in rows {
                guard.insert(row.sku.clone(), row);
            }
        }
        self
    }

    /// Make the n-th upsert call (from zero) fail.
    pub fn fail_batch(mut self, call: usize) -> Self {
        self.failing_batches.insert(call);
        self
    }

    pub fn failing_prune(mut self) -> Self {
        self.fail_prune = true;
        self
    }

    pub fn failing_existing(mut self) -> Self {
        self.fail_existing = true;
        self
    }

    /// Current staging rows in insertion order.
    pub fn staged(&self) -> Vec<StagingRow> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, StagingRow>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        if self.fail_prune {
            return Err(HarvestError::store("staging store unreachable"));
        }
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|_, row| row.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn existing_skus(&self) -> Result<HashSet<String>> {
        if self.fail_existing {
            return Err(HarvestError::store("public list unreachable"));
        }
        Ok(self.existing.clone())
    }

    async fn upsert_batch(&self, batch: &[StagingRow]) -> Result<u64> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_batches.contains(&call) {
            return Err(HarvestError::store(format!("batch {} rejected", call)));
        }

        let mut rows = self.lock();
        for incoming in batch {
            match rows.get_mut(&incoming.sku) {
                Some(stored) => {
                    stored.internet_number = stored.internet_number.or(incoming.internet_number);
                    stored.barcode_upc = stored.barcode_upc.take().or_else(|| incoming.barcode_upc.clone());
                    stored.item_name = stored.item_name.take().or_else(|| incoming.item_name.clone());
                    stored.brand = stored.brand.take().or_else(|| incoming.brand.clone());
                    stored.retail_price = stored.retail_price.or(incoming.retail_price);
                    stored.image_url = stored.image_url.take().or_else(|| incoming.image_url.clone());
                    stored.product_link =
                        stored.product_link.take().or_else(|| incoming.product_link.clone());
                },
                None => {
                    rows.insert(incoming.sku.clone(), incoming.clone());
                },
            }
        }
        Ok(batch.len() as u64)
    }
}
