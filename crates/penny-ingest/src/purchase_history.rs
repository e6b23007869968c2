//! Purchase-history import
//!
//! Each purchase-history CSV is one contributor. Only penny purchases are
//! kept, and a SKU bought several times keeps its most recent purchase date.
//! Nothing identifying the purchaser or the store number is carried over;
//! the store column only holds the state code, inferred from the filename.

use crate::error::Result;
use crate::export::{parse_sheet_date, ExportRow};
use crate::normalize::aliases::{resolve_column, PURCHASE_ALIASES};
use chrono::NaiveDate;
use indexmap::IndexMap;
use penny_common::sku::to_digits;
use penny_common::Sku;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info, warn};

/// Unit price of a penny item.
pub const PENNY_PRICE: f64 = 0.01;

const PRICE_TOLERANCE: f64 = 0.0009;

/// Full state names (underscore-joined) to postal codes
pub const STATE_NAME_TO_CODE: &[(&str, &str)] = &[
    ("ALABAMA", "AL"),
    ("ALASKA", "AK"),
    ("ARIZONA", "AZ"),
    ("ARKANSAS", "AR"),
    ("CALIFORNIA", "CA"),
    ("COLORADO", "CO"),
    ("CONNECTICUT", "CT"),
    ("DELAWARE", "DE"),
    ("FLORIDA", "FL"),
    ("GEORGIA", "GA"),
    ("HAWAII", "HI"),
    ("IDAHO", "ID"),
    ("ILLINOIS", "IL"),
    ("INDIANA", "IN"),
    ("IOWA", "IA"),
    ("KANSAS", "KS"),
    ("KENTUCKY", "KY"),
    ("LOUISIANA", "LA"),
    ("MAINE", "ME"),
    ("MARYLAND", "MD"),
    ("MASSACHUSETTS", "MA"),
    ("MICHIGAN", "MI"),
    ("MINNESOTA", "MN"),
    ("MISSISSIPPI", "MS"),
    ("MISSOURI", "MO"),
    ("MONTANA", "MT"),
    ("NEBRASKA", "NE"),
    ("NEVADA", "NV"),
    ("NEW_HAMPSHIRE", "NH"),
    ("NEW_JERSEY", "NJ"),
    ("NEW_MEXICO", "NM"),
    ("NEW_YORK", "NY"),
    ("NORTH_CAROLINA", "NC"),
    ("NORTH_DAKOTA", "ND"),
    ("OHIO", "OH"),
    ("OKLAHOMA", "OK"),
    ("OREGON", "OR"),
    ("PENNSYLVANIA", "PA"),
    ("RHODE_ISLAND", "RI"),
    ("SOUTH_CAROLINA", "SC"),
    ("SOUTH_DAKOTA", "SD"),
    ("TENNESSEE", "TN"),
    ("TEXAS", "TX"),
    ("UTAH", "UT"),
    ("VERMONT", "VT"),
    ("VIRGINIA", "VA"),
    ("WASHINGTON", "WA"),
    ("WEST_VIRGINIA", "WV"),
    ("WISCONSIN", "WI"),
    ("WYOMING", "WY"),
    ("DISTRICT_OF_COLUMBIA", "DC"),
];

/// One penny purchase
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRow {
    pub sku: Sku,
    pub name: String,
    /// Digits only; empty when absent or zero
    pub internet_sku: String,
    pub purchase_date: NaiveDate,
    pub state: String,
}

impl From<&PurchaseRow> for ExportRow {
    fn from(row: &PurchaseRow) -> Self {
        ExportRow {
            item_name: row.name.clone(),
            sku: row.sku.to_string(),
            store: row.state.clone(),
            purchase_date: row.purchase_date.format("%Y-%m-%d").to_string(),
            internet_sku: row.internet_sku.clone(),
            ..ExportRow::default()
        }
    }
}

/// Rows read from one purchase-history file
#[derive(Debug, Default)]
pub struct PurchaseFile {
    pub rows: Vec<PurchaseRow>,
    /// Data rows after the header
    pub read: usize,
    /// Rows dropped for a non-penny price, missing date, or bad SKU
    pub skipped: usize,
    /// Same-SKU purchases folded into one
    pub deduplicated: usize,
}

pub struct PurchaseHistoryImporter {
    sku_token: Regex,
    date_token: Regex,
    forced_state: Option<String>,
}

impl PurchaseHistoryImporter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sku_token: Regex::new(r"(?i)\bsku\b")?,
            date_token: Regex::new(r"(?i)\bdate\b")?,
            forced_state: None,
        })
    }

    /// Use `state` for every row instead of inferring it from the filename.
    pub fn with_forced_state(mut self, state: impl AsRef<str>) -> Self {
        let state = state.as_ref().trim().to_uppercase();
        self.forced_state = Some(state).filter(|s| !s.is_empty());
        self
    }

    /// Import one file: parse, filter, and dedupe within the file.
    pub fn import_path(&self, path: impl AsRef<Path>) -> Result<PurchaseFile> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), "Purchase history is not UTF-8; decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            },
        };

        let state = match &self.forced_state {
            Some(state) => state.clone(),
            None => infer_state_code(path).unwrap_or_default(),
        };
        if state.is_empty() {
            warn!(path = %path.display(), "Could not infer a state from the filename");
        }

        let mut file = self.parse(&text, &state)?;
        let before = file.rows.len();
        file.rows = dedupe_latest(file.rows);
        file.deduplicated = before - file.rows.len();

        info!(
            path = %path.display(),
            state = %state,
            read = file.read,
            kept = file.rows.len(),
            skipped = file.skipped,
            "Imported purchase history"
        );
        Ok(file)
    }

    /// Parse purchase rows from CSV text. Preamble lines before the header
    /// row are ignored.
    pub fn parse(&self, text: &str, state: &str) -> Result<PurchaseFile> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(header_index) = records.iter().position(|r| self.is_header(r)) else {
            debug!("No header row found");
            return Ok(PurchaseFile::default());
        };
        let headers: Vec<String> = records[header_index]
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let aliases = &PURCHASE_ALIASES;
        let date_col = resolve_column(&headers, aliases.date);
        let sku_col = resolve_column(&headers, aliases.sku);
        let name_col = resolve_column(&headers, aliases.item_name);
        let internet_col = resolve_column(&headers, aliases.internet_sku);
        let price_col = resolve_column(&headers, aliases.unit_price);

        let cell = |record: &csv::StringRecord, col: Option<usize>| -> String {
            col.and_then(|i| record.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut file = PurchaseFile::default();
        for record in &records[header_index + 1..] {
            file.read += 1;
            let purchase_date = parse_sheet_date(&cell(record, date_col));
            let sku = Sku::parse(&cell(record, sku_col)).ok();
            let is_penny = parse_money(&cell(record, price_col))
                .map(|p| (p - PENNY_PRICE).abs() <= PRICE_TOLERANCE)
                .unwrap_or(false);

            let (Some(purchase_date), Some(sku), true) = (purchase_date, sku, is_penny) else {
                file.skipped += 1;
                continue;
            };

            let internet_sku = to_digits(&cell(record, internet_col));
            file.rows.push(PurchaseRow {
                sku,
                name: cell(record, name_col),
                internet_sku: if internet_sku == "0" { String::new() } else { internet_sku },
                purchase_date,
                state: state.to_string(),
            });
        }
        Ok(file)
    }

    fn is_header(&self, record: &csv::StringRecord) -> bool {
        let joined = record.iter().map(str::trim).collect::<Vec<_>>().join("|");
        self.sku_token.is_match(&joined) && self.date_token.is_match(&joined)
    }
}

/// Keep one row per SKU: the latest purchase date, and on equal dates the
/// longer item name or the row carrying an internet SKU. Newest first.
pub fn dedupe_latest(rows: Vec<PurchaseRow>) -> Vec<PurchaseRow> {
    let mut by_sku: IndexMap<Sku, PurchaseRow> = IndexMap::new();
    for row in rows {
        match by_sku.get(&row.sku) {
            None => {
                by_sku.insert(row.sku.clone(), row);
            },
            Some(existing) => {
                let newer = row.purchase_date > existing.purchase_date;
                let better_tie = row.purchase_date == existing.purchase_date
                    && (row.name.len() > existing.name.len()
                        || (existing.internet_sku.is_empty() && !row.internet_sku.is_empty()));
                if newer || better_tie {
                    by_sku.insert(row.sku.clone(), row);
                }
            },
        }
    }
    let mut rows: Vec<PurchaseRow> = by_sku.into_values().collect();
    rows.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date));
    rows
}

/// State code from a filename such as `TX_orders.csv`, `TEXAS-2025.csv`, or
/// `export_NEW_HAMPSHIRE.csv`.
pub fn infer_state_code(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_uppercase();
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_uppercase() { c } else { '_' })
        .collect();
    let tokens: Vec<&str> = replaced.split('_').filter(|t| !t.is_empty()).collect();
    let first = tokens.first()?;

    if first.len() == 2 {
        return Some(first.to_string());
    }
    if let Some((_, code)) = STATE_NAME_TO_CODE.iter().find(|(state, _)| state == first) {
        return Some(code.to_string());
    }

    let padded = format!("_{}_", tokens.join("_"));
    STATE_NAME_TO_CODE
        .iter()
        .filter(|(state, _)| padded.contains(&format!("_{}_", state)))
        .max_by_key(|(state, _)| state.len())
        .map(|(_, code)| code.to_string())
}

fn parse_money(text: &str) -> Option<f64> {
    let cleaned = text.replace(['$', ','], "");
    cleaned.trim().parse::<f64>().ok()
}
