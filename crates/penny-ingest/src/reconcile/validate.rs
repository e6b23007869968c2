//! Post-merge integrity validation
//!
//! Runs over the complete reconciled output before anything is written. Any
//! violation fails the whole set.

use super::merge::Mergeable;
use crate::identity::DedupeKey;
use penny_common::Sku;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// The same key appears on more than one output row
    DuplicateKey { key: String, rows: Vec<usize> },
    /// A row's SKU is not 6 or 10 digits
    InvalidSku { row: usize, sku: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DuplicateKey { key, rows } => {
                write!(f, "duplicate key {} on rows {:?}", key, rows)
            },
            Violation::InvalidSku { row, sku } => write!(f, "invalid SKU '{}' on row {}", sku, row),
        }
    }
}

#[derive(Error, Debug)]
#[error("Integrity validation failed with {} violation(s): {}", .violations.len(), summarize(.violations))]
pub struct IntegrityError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    const SHOWN: usize = 5;
    let mut text = violations
        .iter()
        .take(SHOWN)
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    if violations.len() > SHOWN {
        text.push_str(&format!("; and {} more", violations.len() - SHOWN));
    }
    text
}

/// Check key uniqueness and SKU shape over `(key, row)` pairs in output order.
/// Keys are expected to be derived from the rows as they will be written.
pub fn validate_output<'a, R, K, I>(entries: I) -> std::result::Result<(), IntegrityError>
where
    R: Mergeable + 'a,
    K: Borrow<DedupeKey>,
    I: IntoIterator<Item = (K, &'a R)>,
{
    let mut violations = Vec::new();
    let mut seen: HashMap<String, Vec<usize>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (row, (key, value)) in entries.into_iter().enumerate() {
        let sku = value.sku_text();
        if !Sku::is_canonical(sku) {
            violations.push(Violation::InvalidSku {
                row,
                sku: sku.to_string(),
            });
        }
        let key = key.borrow().to_string();
        let rows = seen.entry(key.clone()).or_default();
        if rows.is_empty() {
            order.push(key);
        }
        rows.push(row);
    }

    for key in order {
        if let Some(rows) = seen.remove(&key) {
            if rows.len() > 1 {
                violations.push(Violation::DuplicateKey { key, rows });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError { violations })
    }
}
