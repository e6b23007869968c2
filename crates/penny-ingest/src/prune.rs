//! Staleness pruning of the staging area

use crate::config::DEFAULT_RETENTION_DAYS;
use crate::storage::StagingStore;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct StalenessPruner {
    retention_days: i64,
}

impl Default for StalenessPruner {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl StalenessPruner {
    pub fn new(retention_days: i64) -> Self {
        Self { retention_days }
    }

    /// `None` when the window reaches outside the representable date range.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        TimeDelta::try_days(self.retention_days).and_then(|window| now.checked_sub_signed(window))
    }

    /// Delete rows older than the retention window.
    ///
    /// Never fails: an unreachable store or an out-of-range window is logged
    /// and reported as `None`, and the run carries on with the stale rows in place.
    pub async fn prune(&self, store: &dyn StagingStore, now: DateTime<Utc>) -> Option<u64> {
        let Some(cutoff) = self.cutoff(now) else {
            warn!(retention_days = self.retention_days, "Retention window out of range; skipping prune");
            return None;
        };
        match store.delete_older_than(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(
                        deleted,
                        retention_days = self.retention_days,
                        "Pruned stale staging rows"
                    );
                }
                Some(deleted)
            },
            Err(e) => {
                warn!(error = %e, "Failed to prune staging; continuing");
                None
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStagingStore, StagingRow};
    use chrono::Duration;

    fn row(sku: &str, created_at: DateTime<Utc>) -> StagingRow {
        StagingRow {
            sku: sku.to_string(),
            internet_number: None,
            barcode_upc: None,
            item_name: None,
            brand: None,
            retail_price: None,
            image_url: None,
            product_link: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_prunes_past_retention() {
        let now = Utc::now();
        let store = InMemoryStagingStore::new().with_rows(vec![
            row("111111", now - Duration::days(61)),
            row("222222", now - Duration::days(59)),
        ]);
        let deleted = StalenessPruner::default().prune(&store, now).await;
        assert_eq!(deleted, Some(1));
        assert_eq!(store.staged().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        let store = InMemoryStagingStore::new().failing_prune();
        assert_eq!(StalenessPruner::new(30).prune(&store, Utc::now()).await, None);
    }

    #[tokio::test]
    async fn test_out_of_range_window_skips_prune() {
        let now = Utc::now();
        let pruner = StalenessPruner::new(100_000_000);
        assert_eq!(pruner.cutoff(now), None);

        let store = InMemoryStagingStore::new().with_rows(vec![row("111111", now - Duration::days(61))]);
        assert_eq!(pruner.prune(&store, now).await, None);
        assert_eq!(store.staged().len(), 1);
    }
}
