//! Reconciler
//!
//! Keeps an insertion-ordered index from [`DedupeKey`] to row. A miss inserts,
//! a hit enriches the stored row through the pure fill-only merge. Rows that
//! collide within one incoming batch are pre-merged with the batch tie-break
//! before they reach the index.

pub mod merge;
pub mod validate;

pub use merge::{BatchRank, MergeRules, Mergeable, Merged};
pub use validate::{validate_output, IntegrityError, Violation};

use crate::identity::DedupeKey;
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Counters accumulated across a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Rows loaded from the base dataset
    pub seeded: usize,
    pub inserted: usize,
    /// Existing rows that gained at least one value
    pub upserted: usize,
    /// Hits that changed nothing
    pub unchanged: usize,
    /// Same-key rows folded together inside one batch
    pub batch_merged: usize,
    /// Populated fields of inserted rows
    pub inserted_fields: BTreeMap<&'static str, usize>,
    /// Fields filled on existing rows
    pub enriched_fields: BTreeMap<&'static str, usize>,
}

impl MergeStats {
    pub fn inserted_field(&self, field: &str) -> usize {
        self.inserted_fields.get(field).copied().unwrap_or(0)
    }

    pub fn enriched_field(&self, field: &str) -> usize {
        self.enriched_fields.get(field).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Enriched(Vec<&'static str>),
    Unchanged,
}

pub struct Reconciler<R> {
    index: IndexMap<DedupeKey, R>,
    rules: MergeRules,
    stats: MergeStats,
}

impl<R: Mergeable> Reconciler<R> {
    pub fn new(rules: MergeRules) -> Self {
        Self {
            index: IndexMap::new(),
            rules,
            stats: MergeStats::default(),
        }
    }

    pub fn rules(&self) -> &MergeRules {
        &self.rules
    }

    /// Load the base dataset. Duplicates are pre-merged; nothing is counted
    /// as inserted or enriched.
    pub fn seed(&mut self, rows: Vec<(DedupeKey, R)>) {
        let batch = self.pre_merge_batch(rows);
        for (key, row) in batch {
            match self.index.entry(key) {
                Entry::Occupied(mut slot) => {
                    let merged = slot.get().merge(&row, &self.rules);
                    *slot.get_mut() = merged.value;
                },
                Entry::Vacant(slot) => {
                    slot.insert(row);
                    self.stats.seeded += 1;
                },
            }
        }
        debug!(rows = self.index.len(), "Seeded reconciliation index");
    }

    pub fn upsert(&mut self, key: DedupeKey, incoming: R) -> UpsertOutcome {
        match self.index.entry(key) {
            Entry::Occupied(mut slot) => {
                let merged = slot.get().merge(&incoming, &self.rules);
                if merged.is_unchanged() {
                    self.stats.unchanged += 1;
                    return UpsertOutcome::Unchanged;
                }
                for field in &merged.enriched {
                    *self.stats.enriched_fields.entry(*field).or_insert(0) += 1;
                }
                self.stats.upserted += 1;
                *slot.get_mut() = merged.value;
                UpsertOutcome::Enriched(merged.enriched)
            },
            Entry::Vacant(slot) => {
                for field in incoming.populated_fields() {
                    *self.stats.inserted_fields.entry(field).or_insert(0) += 1;
                }
                self.stats.inserted += 1;
                slot.insert(incoming);
                UpsertOutcome::Inserted
            },
        }
    }

    /// Pre-merge same-key rows of `rows`, then upsert each survivor.
    pub fn upsert_batch(&mut self, rows: Vec<(DedupeKey, R)>) -> Vec<UpsertOutcome> {
        let batch = self.pre_merge_batch(rows);
        let outcomes: Vec<UpsertOutcome> = batch
            .into_iter()
            .map(|(key, row)| self.upsert(key, row))
            .collect();
        info!(
            rows = outcomes.len(),
            inserted = self.stats.inserted,
            upserted = self.stats.upserted,
            "Reconciled batch"
        );
        outcomes
    }

    fn pre_merge_batch(&mut self, rows: Vec<(DedupeKey, R)>) -> IndexMap<DedupeKey, R> {
        let mut batch: IndexMap<DedupeKey, R> = IndexMap::with_capacity(rows.len());
        for (key, row) in rows {
            match batch.entry(key) {
                Entry::Occupied(mut slot) => {
                    let merged = merge::pre_merge(slot.get(), &row, &self.rules);
                    *slot.get_mut() = merged;
                    self.stats.batch_merged += 1;
                },
                Entry::Vacant(slot) => {
                    slot.insert(row);
                },
            }
        }
        batch
    }

    pub fn get(&self, key: &DedupeKey) -> Option<&R> {
        self.index.get(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DedupeKey, &R)> {
        self.index.iter()
    }

    /// Validate the rows under keys recomputed by `rekey` from each stored
    /// key and the row's merged fields.
    pub fn validate<F>(&self, rekey: F) -> std::result::Result<(), IntegrityError>
    where
        F: Fn(&DedupeKey, &R) -> DedupeKey,
    {
        validate_output(self.index.iter().map(|(key, row)| (rekey(key, row), row)))
    }

    /// Validate and hand back the rows in index order. Nothing is returned
    /// when validation fails.
    pub fn finish<F>(self, rekey: F) -> std::result::Result<(Vec<R>, MergeStats), IntegrityError>
    where
        F: Fn(&DedupeKey, &R) -> DedupeKey,
    {
        self.validate(rekey)?;
        Ok((self.index.into_values().collect(), self.stats))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::export::{ExportField, ExportRow};
    use penny_common::Sku;

    fn key(sku: &str) -> DedupeKey {
        DedupeKey::sku_only(Sku::parse(sku).unwrap())
    }

    fn row(sku: &str) -> ExportRow {
        ExportRow::default().with(ExportField::Sku, sku)
    }

    fn by_sku(stored: &DedupeKey, row: &ExportRow) -> DedupeKey {
        Sku::parse(&row.sku)
            .map(DedupeKey::sku_only)
            .unwrap_or_else(|_| stored.clone())
    }

    #[test]
    fn test_batch_duplicates_tie_break_on_quantity() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        let a = row("123456")
            .with(ExportField::Notes, "scratched")
            .with(ExportField::Quantity, "1");
        let b = row("123456")
            .with(ExportField::Notes, "scratched")
            .with(ExportField::Quantity, "3");
        reconciler.upsert_batch(vec![(key("123456"), a), (key("123456"), b)]);

        let (rows, stats) = reconciler.finish(by_sku).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].notes, "scratched");
        assert_eq!(rows[0].quantity, "3");
        assert_eq!(stats.batch_merged, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[test]
    fn test_longer_note_beats_quantity() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        let a = row("123456").with(ExportField::Quantity, "9");
        let b = row("123456")
            .with(ExportField::Notes, "on the endcap")
            .with(ExportField::Quantity, "1");
        reconciler.upsert_batch(vec![(key("123456"), a), (key("123456"), b)]);
        let stored = reconciler.get(&key("123456")).unwrap();
        assert_eq!(stored.quantity, "1");
        assert_eq!(stored.notes, "on the endcap");
    }

    #[test]
    fn test_existing_values_kept_blanks_filled() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        reconciler.seed(vec![(key("123456"), row("123456").with(ExportField::ImageUrl, "http://x"))]);

        let incoming = row("123456")
            .with(ExportField::ImageUrl, "http://y")
            .with(ExportField::InternetSku, "1009991234");
        let outcome = reconciler.upsert(key("123456"), incoming);
        assert_eq!(outcome, UpsertOutcome::Enriched(vec!["internet_sku"]));

        let stored = reconciler.get(&key("123456")).unwrap();
        assert_eq!(stored.image_url, "http://x");
        assert_eq!(stored.internet_sku, "1009991234");
        assert_eq!(reconciler.stats().enriched_field("internet_sku"), 1);
        assert_eq!(reconciler.stats().seeded, 1);
    }

    #[test]
    fn test_repeat_merge_is_idempotent() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        reconciler.seed(vec![(key("123456"), row("123456").with(ExportField::Notes, "dented"))]);
        let incoming = row("123456").with(ExportField::Notes, "Brand=Acme; Model=X1");

        reconciler.upsert(key("123456"), incoming.clone());
        let once = reconciler.get(&key("123456")).unwrap().clone();
        assert_eq!(reconciler.upsert(key("123456"), incoming), UpsertOutcome::Unchanged);
        assert_eq!(reconciler.get(&key("123456")).unwrap(), &once);
        assert_eq!(once.notes, "dented; Brand=Acme; Model=X1");
    }

    #[test]
    fn test_insert_counts_populated_fields() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        let outcome = reconciler.upsert(
            key("654321"),
            row("654321").with(ExportField::ItemName, "Drill"),
        );
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(reconciler.stats().inserted_field("item_name"), 1);
        assert_eq!(reconciler.stats().inserted_field("sku"), 0);
    }

    #[test]
    fn test_invalid_stored_sku_fails_closed() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        reconciler.upsert(key("123456"), row("12345x6"));
        assert!(reconciler.finish(by_sku).is_err());
    }

    #[test]
    fn test_rows_that_rekey_together_fail_validation() {
        let mut reconciler = Reconciler::new(MergeRules::default());
        reconciler.upsert(key("123456"), row("123456"));
        reconciler.upsert(key("654321"), row("123456"));
        // Distinct stored keys, but the written rows share a SKU.
        assert!(reconciler.validate(|stored, _| stored.clone()).is_ok());

        let err = reconciler.finish(by_sku).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::DuplicateKey {
                key: "123456".to_string(),
                rows: vec![0, 1]
            }]
        );
    }
}
