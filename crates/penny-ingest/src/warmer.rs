//! Staging warmer
//!
//! One run: prune stale staging rows, fetch every partition, normalize,
//! drop what the public list already has, dedupe by SKU and then by internet
//! number, cap the admitted set, and write it to staging in batches.

use crate::config::StoreConfig;
use crate::fetch::{FailureClassifier, HeuristicClassifier, PartitionFetcher};
use crate::identity::{IdentityConfig, IdentityKeyBuilder, MergePolicy, RowSource};
use crate::normalize::{dedupe_raw, CanonicalRecord, RecordNormalizer};
use crate::prune::StalenessPruner;
use crate::reconcile::{MergeRules, Reconciler};
use crate::storage::{BatchWriter, StagingRow, StagingStore};
use crate::summary::{RunCounts, RunSummary, Stage};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct StagingWarmer {
    fetcher: PartitionFetcher,
    store: Arc<dyn StagingStore>,
    classifier: Box<dyn FailureClassifier>,
    identity: IdentityConfig,
    config: StoreConfig,
}

impl StagingWarmer {
    pub fn new(fetcher: PartitionFetcher, store: Arc<dyn StagingStore>, config: StoreConfig) -> Self {
        Self {
            fetcher,
            store,
            classifier: Box::new(HeuristicClassifier),
            identity: IdentityConfig::default(),
            config,
        }
    }

    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub async fn run(&self) -> RunSummary {
        self.run_at(Utc::now()).await
    }

    /// Run with ages and retention computed relative to `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunSummary {
        let mut counts = RunCounts {
            partitions: self.fetcher.partitions().len(),
            ..RunCounts::default()
        };
        info!(
            partitions = counts.partitions,
            max_uniques = self.config.max_uniques,
            batch_size = self.config.batch_size,
            "Starting staging warmer"
        );

        let pruner = StalenessPruner::new(self.config.retention_days);
        counts.pruned = pruner.prune(self.store.as_ref(), now).await.unwrap_or(0);

        let existing = match self.store.existing_skus().await {
            Ok(skus) => skus,
            Err(e) => {
                warn!(error = %e, "Failed to load existing SKUs; continuing without them");
                HashSet::new()
            },
        };

        let report = self.fetcher.fetch_all().await;
        counts.fetched = report.total_items();
        counts.partitions_failed = report.results.iter().filter(|r| r.error.is_some()).count();
        if let Err(e) = report.ensure_items(self.classifier.as_ref()) {
            error!(stage = %e.stage(), error = %e, "Fetch produced no items");
            return RunSummary::from_error(&e, counts).with_diagnostics(report.results);
        }

        let raw = dedupe_raw(report.items);
        counts.raw_duplicates = counts.fetched - raw.len();

        let batch = RecordNormalizer::new(now).normalize_batch(&raw);
        counts.normalized = batch.records.len();
        counts.invalid_skus = batch.rejected;

        let fresh: Vec<CanonicalRecord> = batch
            .records
            .into_iter()
            .filter(|r| !existing.contains(r.sku.as_str()))
            .collect();
        counts.skipped_existing = counts.normalized - fresh.len();

        let keys = IdentityKeyBuilder::new(&self.identity, MergePolicy::SkuOnly);
        let mut reconciler = Reconciler::new(MergeRules::default());
        reconciler.upsert_batch(
            fresh
                .into_iter()
                .map(|r| (keys.key_for_record(&r, RowSource::Current), r))
                .collect(),
        );
        let (unique, stats) = match reconciler.finish(|stored, record| keys.rekey_record(stored, record)) {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Reconciled staging set failed validation");
                return RunSummary::failure(Stage::Validate, e, counts);
            },
        };
        counts.sku_duplicates = stats.batch_merged;

        let admitted = self.admit(unique, &mut counts);
        counts.admitted = admitted.len();
        if admitted.is_empty() {
            info!("No new items to stage");
            return RunSummary::success(counts);
        }

        let rows: Vec<StagingRow> = admitted
            .iter()
            .map(|r| StagingRow::from_record(r, now))
            .collect();
        let writer = BatchWriter::new(self.config.batch_size, self.config.batch_pause);
        let written = writer.write_all(self.store.as_ref(), &rows).await;
        counts.upserted = written.upserted;
        counts.failed = written.failed;

        if written.high_error_rate() {
            warn!(failed = written.failed, upserted = written.upserted, "High error rate detected");
            return RunSummary::failure(
                Stage::Persist,
                format!(
                    "High error rate: {} of {} rows failed to upsert",
                    written.failed,
                    rows.len()
                ),
                counts,
            );
        }

        info!(
            admitted = counts.admitted,
            upserted = counts.upserted,
            "Staging warmer finished"
        );
        RunSummary::success(counts)
    }

    /// Drop records whose internet number was already admitted, and stop at
    /// the max-uniques cap.
    fn admit(&self, records: Vec<CanonicalRecord>, counts: &mut RunCounts) -> Vec<CanonicalRecord> {
        let mut seen_internet: HashSet<i64> = HashSet::new();
        let mut admitted = Vec::new();

        for record in records {
            if let Some(n) = record.internet_number {
                if !seen_internet.insert(n) {
                    counts.internet_duplicates += 1;
                    continue;
                }
            }
            if admitted.len() >= self.config.max_uniques {
                counts.over_cap += 1;
                continue;
            }
            admitted.push(record);
        }

        if counts.over_cap > 0 {
            info!(max_uniques = self.config.max_uniques, over_cap = counts.over_cap, "Reached max uniques");
        }
        admitted
    }
}
