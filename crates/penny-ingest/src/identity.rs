//! Dedupe identity
//!
//! A [`DedupeKey`] decides whether two rows describe the same fact. Under
//! [`MergePolicy::SkuOnly`] it is the SKU alone; under
//! [`MergePolicy::ContributorAware`] it is the SKU plus the contributor the row
//! came from, so that different people reporting one SKU stay separate rows.
//!
//! Contributor inference order is fixed: explicit email, then a configured
//! single-contributor region found in the store location, then a label for
//! the source the row was read from.

use crate::export::ExportRow;
use crate::normalize::CanonicalRecord;
use penny_common::Sku;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    SkuOnly,
    ContributorAware,
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sku" | "sku_only" | "sku-only" => Ok(MergePolicy::SkuOnly),
            "contributor" | "contributor_aware" | "contributor-aware" => {
                Ok(MergePolicy::ContributorAware)
            },
            other => Err(format!("Unknown merge policy: {}", other)),
        }
    }
}

/// Where a row was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowSource {
    /// The current consolidated dataset
    Current,
    /// The n-th additional export, numbered from 1
    Export(usize),
}

/// Contributor defaults, built once per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// (region code, contributor label) pairs for regions reported by a
    /// single contributor
    pub regional_contributors: Vec<(String, String)>,
    pub current_label: String,
    pub export_label_prefix: String,
    /// Region every verified-backup item is attributed to
    pub verified_region: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            regional_contributors: vec![("GA".to_string(), "Primary (GA)".to_string())],
            current_label: "Existing Data".to_string(),
            export_label_prefix: "Other Export #".to_string(),
            verified_region: "GA".to_string(),
        }
    }
}

impl IdentityConfig {
    pub fn with_regional_contributor(
        mut self,
        region: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.regional_contributors.push((region.into(), label.into()));
        self
    }

    pub fn with_verified_region(mut self, region: impl Into<String>) -> Self {
        self.verified_region = region.into();
        self
    }

    /// Contributor label for a region code, if one is configured.
    pub fn regional_label(&self, region: &str) -> Option<&str> {
        self.regional_contributors
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(region))
            .map(|(_, label)| label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContributorIdentity(String);

impl ContributorIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContributorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupeKey {
    pub sku: Sku,
    pub contributor: Option<ContributorIdentity>,
}

impl DedupeKey {
    pub fn sku_only(sku: Sku) -> Self {
        Self {
            sku,
            contributor: None,
        }
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contributor {
            Some(contributor) => write!(f, "{}||{}", self.sku, contributor),
            None => write!(f, "{}", self.sku),
        }
    }
}

pub struct IdentityKeyBuilder<'a> {
    config: &'a IdentityConfig,
    policy: MergePolicy,
}

impl<'a> IdentityKeyBuilder<'a> {
    pub fn new(config: &'a IdentityConfig, policy: MergePolicy) -> Self {
        Self { config, policy }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Infer the contributor of a row from its email, store location, and
    /// source, in that order.
    pub fn contributor(
        &self,
        email: &str,
        location: &str,
        source: RowSource,
    ) -> ContributorIdentity {
        if let Some(id) = self.attributed(email, location) {
            return id;
        }

        match source {
            RowSource::Current => ContributorIdentity(self.config.current_label.clone()),
            RowSource::Export(n) => {
                ContributorIdentity(format!("{}{}", self.config.export_label_prefix, n))
            },
        }
    }

    /// Contributor carried by the row itself: its email, or a configured
    /// region found as a whole token of the location.
    fn attributed(&self, email: &str, location: &str) -> Option<ContributorIdentity> {
        let email = email.trim();
        if !email.is_empty() {
            return Some(ContributorIdentity(email.to_string()));
        }
        location
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .find_map(|token| self.config.regional_label(token))
            .map(|label| ContributorIdentity(label.to_string()))
    }

    pub fn key(&self, sku: Sku, email: &str, location: &str, source: RowSource) -> DedupeKey {
        match self.policy {
            MergePolicy::SkuOnly => DedupeKey::sku_only(sku),
            MergePolicy::ContributorAware => DedupeKey {
                contributor: Some(self.contributor(email, location, source)),
                sku,
            },
        }
    }

    /// Key for an export row; `None` when its SKU is invalid.
    pub fn key_for_row(&self, row: &ExportRow, source: RowSource) -> Option<DedupeKey> {
        let sku = Sku::parse(&row.sku).ok()?;
        Some(self.key(sku, &row.email, &row.store, source))
    }

    pub fn key_for_record(&self, record: &CanonicalRecord, source: RowSource) -> DedupeKey {
        let location = record.store_name.as_deref().unwrap_or_default();
        self.key(record.sku.clone(), "", location, source)
    }

    /// Recompute the key of a reconciled row from its final fields. The
    /// source label cannot be read back from a row, so the stored
    /// contributor is kept when the row carries no attribution of its own.
    /// An unparsable SKU keeps the stored key.
    pub fn rekey_row(&self, stored: &DedupeKey, row: &ExportRow) -> DedupeKey {
        match Sku::parse(&row.sku) {
            Ok(sku) => self.rekey(stored, sku, &row.email, &row.store),
            Err(_) => stored.clone(),
        }
    }

    pub fn rekey_record(&self, stored: &DedupeKey, record: &CanonicalRecord) -> DedupeKey {
        let location = record.store_name.as_deref().unwrap_or_default();
        self.rekey(stored, record.sku.clone(), "", location)
    }

    fn rekey(&self, stored: &DedupeKey, sku: Sku, email: &str, location: &str) -> DedupeKey {
        match self.policy {
            MergePolicy::SkuOnly => DedupeKey::sku_only(sku),
            MergePolicy::ContributorAware => DedupeKey {
                contributor: self
                    .attributed(email, location)
                    .or_else(|| stored.contributor.clone()),
                sku,
            },
        }
    }

    /// Key for an item attributed to the configured verified region.
    pub fn regional_key(&self, sku: Sku) -> DedupeKey {
        let region = self.config.verified_region.as_str();
        self.key(sku, "", region, RowSource::Current)
    }
}
