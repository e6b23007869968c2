//! Verified-backup items
//!
//! The backup is a JSON object keyed by SKU. Every item belongs to the
//! configured verified region and carries an optional brand/model pair that
//! becomes a `Brand=X; Model=Y` note annotation.

use crate::error::Result;
use crate::export::ExportRow;
use indexmap::IndexMap;
use penny_common::sku::to_digits;
use penny_common::Sku;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedItem {
    #[serde(default, deserialize_with = "lenient_text")]
    pub sku: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub internet_number: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub brand: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub image_url: String,
    #[serde(default)]
    pub purchase_dates: Vec<String>,
}

impl VerifiedItem {
    /// `Brand=X; Model=Y`, only when both are known.
    pub fn annotation(&self) -> Option<String> {
        let brand = self.brand.trim();
        let model = self.model.trim();
        (!brand.is_empty() && !model.is_empty()).then(|| format!("Brand={}; Model={}", brand, model))
    }

    /// Internet number as digits; empty when missing or zero.
    pub fn internet_sku(&self) -> String {
        let digits = to_digits(&self.internet_number);
        if digits.trim_start_matches('0').is_empty() {
            String::new()
        } else {
            digits
        }
    }

    /// Export row for this item, attributed to `region`.
    pub fn to_export_row(&self, sku: &Sku, region: &str) -> ExportRow {
        ExportRow {
            item_name: self.name.trim().to_string(),
            sku: sku.to_string(),
            store: region.to_string(),
            purchase_date: self
                .purchase_dates
                .first()
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
            image_url: self.image_url.trim().to_string(),
            notes: self.annotation().unwrap_or_default(),
            internet_sku: self.internet_sku(),
            ..ExportRow::default()
        }
    }
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Load items in file order.
pub fn load_verified<R: Read>(reader: R) -> Result<Vec<VerifiedItem>> {
    let items: IndexMap<String, VerifiedItem> = serde_json::from_reader(reader)?;
    Ok(items.into_values().collect())
}

pub fn load_verified_path(path: impl AsRef<Path>) -> Result<Vec<VerifiedItem>> {
    load_verified(std::io::BufReader::new(std::fs::File::open(path)?))
}
