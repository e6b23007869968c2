//! Structured run summaries
//!
//! Every pipeline run ends in a [`RunSummary`] whether it succeeded or not.
//! A failed run names the [`Stage`] that failed and a readable cause, so the
//! printed summary is enough to diagnose a run without the logs.

use crate::error::HarvestError;
use crate::fetch::{FailureHint, PartitionResult};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Load,
    Fetch,
    Normalize,
    Validate,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Load => "load",
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Validate => "validate",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Counters of a staging-warmer run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub partitions: usize,
    pub partitions_failed: usize,
    pub fetched: usize,
    /// Raw items repeating a (store_sku, store_name) pair
    pub raw_duplicates: usize,
    pub normalized: usize,
    pub invalid_skus: usize,
    pub skipped_existing: usize,
    /// Same-SKU records merged together
    pub sku_duplicates: usize,
    pub internet_duplicates: usize,
    /// Unique records left out by the max-uniques cap
    pub over_cap: usize,
    pub admitted: usize,
    pub pruned: u64,
    pub upserted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<C = RunCounts> {
    pub ok: bool,
    pub stage: Option<Stage>,
    pub error: Option<String>,
    pub hint: Option<FailureHint>,
    pub counts: C,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<PartitionResult>,
}

impl<C> RunSummary<C> {
    pub fn success(counts: C) -> Self {
        Self {
            ok: true,
            stage: None,
            error: None,
            hint: None,
            counts,
            diagnostics: Vec::new(),
        }
    }

    pub fn failure(stage: Stage, error: impl fmt::Display, counts: C) -> Self {
        Self {
            ok: false,
            stage: Some(stage),
            error: Some(error.to_string()),
            hint: None,
            counts,
            diagnostics: Vec::new(),
        }
    }

    /// Failure tagged with the error's own stage, carrying its fetch hint.
    pub fn from_error(error: &HarvestError, counts: C) -> Self {
        let mut summary = Self::failure(error.stage(), error, counts);
        if let HarvestError::NoItems { hint } = error {
            summary.hint = Some(*hint);
        }
        summary
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<PartitionResult>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_items_failure_shape() {
        let err = HarvestError::NoItems {
            hint: FailureHint::NoData,
        };
        let summary = RunSummary::from_error(&err, RunCounts::default());
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["stage"], json!("fetch"));
        assert_eq!(value["hint"], json!("no-data"));
        assert!(value["error"].as_str().unwrap().starts_with("Empty API response."));
        assert!(value.get("diagnostics").is_none());
    }

    #[test]
    fn test_success_shape() {
        let summary = RunSummary::success(RunCounts {
            admitted: 3,
            ..RunCounts::default()
        });
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["stage"], json!(null));
        assert_eq!(value["counts"]["admitted"], json!(3));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Persist.to_string(), "persist");
    }
}
