//! Record normalization
//!
//! Maps loosely-shaped upstream items onto [`CanonicalRecord`]. Each field is
//! resolved through [`aliases::UPSTREAM_ALIASES`]. SKUs that fail the 6/10
//! digit rule are rejected here, before anything downstream sees them.

pub mod aliases;
pub mod price;

use aliases::{UpstreamAliases, CENTS_FIELD, UPSTREAM_ALIASES};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use penny_common::{PennyError, Sku};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Age assigned to records without a usable date.
pub const UNDATED_AGE_DAYS: i64 = 999;

/// One upstream item exactly as received
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawItemRecord(Map<String, Value>);

impl RawItemRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// First candidate holding a non-empty value.
    pub fn resolve(&self, candidates: &[&'static str]) -> Option<(&'static str, &Value)> {
        candidates.iter().find_map(|name| {
            self.0
                .get(*name)
                .filter(|v| !is_empty_value(v))
                .map(|v| (*name, v))
        })
    }

    /// Resolved value rendered as trimmed text.
    pub fn text(&self, candidates: &[&'static str]) -> Option<String> {
        self.resolve(candidates).and_then(|(_, v)| value_text(v))
    }
}

impl From<Map<String, Value>> for RawItemRecord {
    fn from(map: Map<String, Value>) -> Self {
        RawItemRecord(map)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(text).filter(|t| !t.is_empty())
}

/// Stock on hand, or unknown when the record carries no stock field at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockCount {
    Known(i64),
    Unknown,
}

impl StockCount {
    pub fn known(&self) -> Option<i64> {
        match self {
            StockCount::Known(n) => Some(*n),
            StockCount::Unknown => None,
        }
    }
}

impl fmt::Display for StockCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockCount::Known(n) => write!(f, "{}", n),
            StockCount::Unknown => f.write_str("Check App"),
        }
    }
}

impl Serialize for StockCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StockCount::Known(n) => serializer.serialize_i64(*n),
            StockCount::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// Schema-stable representation of one upstream item
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub sku: Sku,
    pub internet_number: Option<i64>,
    pub barcode_upc: Option<String>,
    pub item_name: Option<String>,
    pub brand: Option<String>,
    pub retail_price: Option<f64>,
    pub display_price: String,
    pub image_url: Option<String>,
    pub product_link: Option<String>,
    pub location: Option<String>,
    pub store_name: Option<String>,
    pub stock_count: StockCount,
    pub listed_date: Option<NaiveDate>,
    pub age_days: i64,
    pub raw_stock_field: String,
    pub raw_date_field: String,
}

/// Output of normalizing a batch
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    /// Items dropped because their SKU failed validation
    pub rejected: usize,
}

pub struct RecordNormalizer {
    aliases: &'static UpstreamAliases,
    now: DateTime<Utc>,
}

impl RecordNormalizer {
    /// Normalizer computing ages relative to `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            aliases: &UPSTREAM_ALIASES,
            now,
        }
    }

    pub fn normalize(&self, raw: &RawItemRecord) -> Result<CanonicalRecord, PennyError> {
        let a = self.aliases;
        let sku_text = raw.text(a.sku).unwrap_or_default();
        let sku = Sku::parse(&sku_text)?;

        let display = raw.resolve(a.display_price);
        let display_price = price::display_price(
            display.map(|(_, v)| v),
            display.map(|(name, _)| name == CENTS_FIELD).unwrap_or(false),
        );

        let (stock_count, raw_stock_field) = match raw.resolve(a.stock) {
            Some((name, value)) => (StockCount::Known(stock_value(value)), name.to_string()),
            None => (StockCount::Unknown, String::new()),
        };

        let (listed_at, raw_date_field) = match raw.resolve(a.listed_date) {
            Some((name, value)) => (value_text(value).and_then(|t| parse_timestamp(&t)), name.to_string()),
            None => (None, String::new()),
        };
        let age_days = listed_at
            .map(|at| (self.now - at).num_days().max(0))
            .unwrap_or(UNDATED_AGE_DAYS);

        Ok(CanonicalRecord {
            sku,
            internet_number: raw
                .resolve(a.internet_number)
                .and_then(|(_, v)| positive_integer(v)),
            barcode_upc: raw.text(a.barcode_upc),
            item_name: raw.text(a.item_name),
            brand: raw.text(a.brand),
            retail_price: raw
                .resolve(a.retail_price)
                .and_then(|(_, v)| price::retail_price(v)),
            display_price,
            image_url: raw.text(a.image_url),
            product_link: raw.text(a.product_link),
            location: raw.text(a.location),
            store_name: raw.text(a.store_name),
            stock_count,
            listed_date: listed_at.map(|at| at.date_naive()),
            age_days,
            raw_stock_field,
            raw_date_field,
        })
    }

    pub fn normalize_batch(&self, raws: &[RawItemRecord]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for raw in raws {
            match self.normalize(raw) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    debug!(error = %e, "Dropping item with invalid SKU");
                    batch.rejected += 1;
                },
            }
        }
        batch
    }
}

/// Collapse raw items repeating the same (`store_sku`, `store_name`) pair.
///
/// Items missing either field are always kept.
pub fn dedupe_raw(items: Vec<RawItemRecord>) -> Vec<RawItemRecord> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let sku = item.get("store_sku").and_then(value_text);
            let store = item.get("store_name").and_then(value_text);
            match (sku, store) {
                (Some(sku), Some(store)) => seen.insert((sku, store)),
                _ => true,
            }
        })
        .collect()
}

/// Present-but-unparsable stock reads as zero.
fn stock_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.trunc() as i64)
            .unwrap_or(0),
        _ => 0,
    }
}

fn positive_integer(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (n > 0).then_some(n)
}

/// Accepts RFC 3339, naive date-times, and plain dates (read as UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
