//! Consolidation pipeline
//!
//! Seeds the index with the current dataset, folds additional exports in
//! order, then merges the verified backup under its configured region. The
//! reconciled set is validated before anything can be written, and the run
//! renders an audit report for operators.

use crate::error::Result;
use crate::export::{read_rows_from_path, ExportRow};
use crate::identity::{DedupeKey, IdentityConfig, IdentityKeyBuilder, MergePolicy, RowSource};
use crate::reconcile::{IntegrityError, MergeRules, MergeStats, Reconciler};
use crate::summary::{RunSummary, Stage};
use crate::verified::{load_verified_path, VerifiedItem};
use chrono::{DateTime, Utc};
use penny_common::Sku;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

/// Rows read from one input file
#[derive(Debug, Clone, Default)]
pub struct SourceRows {
    pub label: String,
    pub rows: Vec<ExportRow>,
}

impl SourceRows {
    pub fn new(label: impl Into<String>, rows: Vec<ExportRow>) -> Self {
        Self {
            label: label.into(),
            rows,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let rows = read_rows_from_path(path)?;
        info!(path = %path.display(), rows = rows.len(), "Loaded export");
        Ok(Self::new(path.display().to_string(), rows))
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifiedSource {
    pub label: String,
    pub items: Vec<VerifiedItem>,
}

impl VerifiedSource {
    pub fn load(path: &Path) -> Result<Self> {
        let items = load_verified_path(path)?;
        info!(path = %path.display(), items = items.len(), "Loaded verified backup");
        Ok(Self {
            label: path.display().to_string(),
            items,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationInputs {
    pub current: SourceRows,
    pub exports: Vec<SourceRows>,
    pub verified: Option<VerifiedSource>,
}

impl ConsolidationInputs {
    /// Read every input file.
    pub fn load(current: &Path, exports: &[impl AsRef<Path>], verified: Option<&Path>) -> Result<Self> {
        Ok(Self {
            current: SourceRows::load(current)?,
            exports: exports
                .iter()
                .map(|p| SourceRows::load(p.as_ref()))
                .collect::<Result<Vec<_>>>()?,
            verified: verified.map(VerifiedSource::load).transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCount {
    pub store: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationCounts {
    pub current_rows: usize,
    pub export_rows: Vec<usize>,
    pub verified_items: usize,
    pub invalid_skus: usize,
    pub output_rows: usize,
    pub merge: MergeStats,
    pub rows_by_store: Vec<StoreCount>,
}

/// Result of reconciling the inputs
#[derive(Debug)]
pub struct Consolidation {
    pub policy: MergePolicy,
    pub counts: ConsolidationCounts,
    /// Validated rows, or the integrity failure that blocks every write
    pub outcome: std::result::Result<Vec<ExportRow>, IntegrityError>,
    sources: Vec<(String, String)>,
}

impl Consolidation {
    pub fn rows(&self) -> Option<&[ExportRow]> {
        self.outcome.as_ref().ok().map(Vec::as_slice)
    }

    pub fn summary(&self) -> RunSummary<ConsolidationCounts> {
        match &self.outcome {
            Ok(_) => RunSummary::success(self.counts.clone()),
            Err(e) => RunSummary::failure(Stage::Validate, e, self.counts.clone()),
        }
    }

    /// Plain-text audit of the run.
    pub fn audit_report(&self, generated_at: DateTime<Utc>) -> String {
        let c = &self.counts;
        let m = &c.merge;
        let mut out = String::new();

        let _ = writeln!(out, "=== Consolidation Audit ===");
        let _ = writeln!(out, "Timestamp: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Policy: {}", policy_name(self.policy));
        let _ = writeln!(out);
        let _ = writeln!(out, "INPUT SOURCES:");
        for (name, detail) in &self.sources {
            let _ = writeln!(out, "- {}: {}", name, detail);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "OPERATIONS:");
        let _ = writeln!(out, "- Dropped (invalid SKU): {} rows", c.invalid_skus);
        let _ = writeln!(out, "- Same-key rows merged within a source: {}", m.batch_merged);
        let _ = writeln!(out, "- Upserted (enriched existing): {} rows", m.upserted);
        for (field, n) in &m.enriched_fields {
            let _ = writeln!(out, "  - Added {}: {}", field, n);
        }
        let _ = writeln!(out, "- Inserted (new keys): {} rows", m.inserted);
        let _ = writeln!(out, "- Unchanged matches: {}", m.unchanged);
        let _ = writeln!(out);
        let _ = writeln!(out, "OUTPUT:");
        let _ = writeln!(out, "- Rows: {}", c.output_rows);
        let _ = writeln!(out);
        let _ = writeln!(out, "ROWS BY STORE:");
        if c.rows_by_store.is_empty() {
            let _ = writeln!(out, "- (none)");
        }
        for entry in &c.rows_by_store {
            let _ = writeln!(out, "- {}: {}", entry.store, entry.rows);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "VALIDATION:");
        match &self.outcome {
            Ok(_) => {
                let _ = writeln!(out, "- All SKUs valid (6 or 10 digits): [OK]");
                let _ = writeln!(out, "- No duplicate keys: [OK]");
            },
            Err(e) => {
                let _ = writeln!(out, "- FAILED ({} violations)", e.violations.len());
                for violation in &e.violations {
                    let _ = writeln!(out, "  - {}", violation);
                }
            },
        }
        out
    }
}

fn policy_name(policy: MergePolicy) -> &'static str {
    match policy {
        MergePolicy::SkuOnly => "sku",
        MergePolicy::ContributorAware => "sku + contributor",
    }
}

pub struct Consolidator<'a> {
    identity: &'a IdentityConfig,
    policy: MergePolicy,
    rules: MergeRules,
}

impl<'a> Consolidator<'a> {
    pub fn new(identity: &'a IdentityConfig, policy: MergePolicy) -> Self {
        Self {
            identity,
            policy,
            rules: MergeRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: MergeRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn consolidate(&self, inputs: ConsolidationInputs) -> Consolidation {
        let keys = IdentityKeyBuilder::new(self.identity, self.policy);
        let mut reconciler = Reconciler::new(self.rules.clone());
        let mut counts = ConsolidationCounts {
            current_rows: inputs.current.rows.len(),
            export_rows: inputs.exports.iter().map(|e| e.rows.len()).collect(),
            verified_items: inputs.verified.as_ref().map(|v| v.items.len()).unwrap_or(0),
            ..ConsolidationCounts::default()
        };

        let mut sources = vec![(
            "Current".to_string(),
            format!("{} ({} rows)", inputs.current.label, counts.current_rows),
        )];

        let seed = self.keyed(&keys, inputs.current.rows, RowSource::Current, &mut counts);
        reconciler.seed(seed);

        for (i, export) in inputs.exports.into_iter().enumerate() {
            let n = i + 1;
            sources.push((
                format!("Export #{}", n),
                format!("{} ({} rows)", export.label, export.rows.len()),
            ));
            let batch = self.keyed(&keys, export.rows, RowSource::Export(n), &mut counts);
            reconciler.upsert_batch(batch);
        }

        if let Some(verified) = inputs.verified {
            sources.push((
                "Verified backup".to_string(),
                format!("{} ({} items)", verified.label, verified.items.len()),
            ));
            let mut batch = Vec::with_capacity(verified.items.len());
            for item in &verified.items {
                match Sku::parse(&item.sku) {
                    Ok(sku) => {
                        let row = item.to_export_row(&sku, &self.identity.verified_region);
                        batch.push((keys.regional_key(sku), row));
                    },
                    Err(_) => counts.invalid_skus += 1,
                }
            }
            reconciler.upsert_batch(batch);
        }

        if counts.invalid_skus > 0 {
            warn!(dropped = counts.invalid_skus, "Dropped rows with invalid SKUs");
        }

        let outcome = settle(reconciler, |stored, row| keys.rekey_row(stored, row), &mut counts);

        Consolidation {
            policy: self.policy,
            counts,
            outcome,
            sources,
        }
    }

    /// Key each row, dropping rows whose SKU is invalid and storing the
    /// digits-only SKU on the ones kept.
    fn keyed(
        &self,
        keys: &IdentityKeyBuilder<'_>,
        rows: Vec<ExportRow>,
        source: RowSource,
        counts: &mut ConsolidationCounts,
    ) -> Vec<(DedupeKey, ExportRow)> {
        let mut keyed = Vec::with_capacity(rows.len());
        for mut row in rows {
            match keys.key_for_row(&row, source) {
                Some(key) => {
                    row.sku = key.sku.to_string();
                    keyed.push((key, row));
                },
                None => counts.invalid_skus += 1,
            }
        }
        keyed
    }
}

/// Record merge statistics, then validate. The statistics are kept even when
/// validation fails so the audit report can show them.
fn settle<F>(
    reconciler: Reconciler<ExportRow>,
    rekey: F,
    counts: &mut ConsolidationCounts,
) -> std::result::Result<Vec<ExportRow>, IntegrityError>
where
    F: Fn(&DedupeKey, &ExportRow) -> DedupeKey,
{
    counts.merge = reconciler.stats().clone();
    let (rows, _) = reconciler.finish(rekey)?;
    counts.output_rows = rows.len();
    counts.rows_by_store = rows_by_store(&rows);
    Ok(rows)
}

fn rows_by_store(rows: &[ExportRow]) -> Vec<StoreCount> {
    let mut by_store: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let store = row.store.trim();
        let store = if store.is_empty() { "(blank)" } else { store };
        *by_store.entry(store.to_string()).or_insert(0) += 1;
    }
    let mut counts: Vec<StoreCount> = by_store
        .into_iter()
        .map(|(store, rows)| StoreCount { store, rows })
        .collect();
    counts.sort_by(|a, b| b.rows.cmp(&a.rows).then_with(|| a.store.cmp(&b.store)));
    counts
}
