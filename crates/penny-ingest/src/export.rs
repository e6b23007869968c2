//! Canonical export rows
//!
//! The tabular schema shared by the current dataset, additional exports, and
//! consolidated output. Reading resolves columns through the header aliases
//! in [`crate::normalize::aliases`], so older exports with renamed headers
//! load into the same shape. Writing always emits the canonical headers; the
//! public feed leaves out the backend-only Internet SKU column.

use crate::error::Result;
use crate::normalize::aliases::{export_candidates, resolve_column};
use crate::reconcile::merge::{fill_text, merge_note, BatchRank, MergeRules, Mergeable, Merged};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Columns of the canonical export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportField {
    Timestamp,
    Email,
    ItemName,
    Sku,
    Quantity,
    Store,
    PurchaseDate,
    ImageUrl,
    Notes,
    InternetSku,
}

impl ExportField {
    pub const ALL: [ExportField; 10] = [
        ExportField::Timestamp,
        ExportField::Email,
        ExportField::ItemName,
        ExportField::Sku,
        ExportField::Quantity,
        ExportField::Store,
        ExportField::PurchaseDate,
        ExportField::ImageUrl,
        ExportField::Notes,
        ExportField::InternetSku,
    ];

    /// Header written for this column.
    pub fn header(&self) -> &'static str {
        match self {
            ExportField::Timestamp => "Timestamp",
            ExportField::Email => "Email Address",
            ExportField::ItemName => "Item Name",
            ExportField::Sku => "SKU (6 or 10 digits)",
            ExportField::Quantity => "Exact Quantity Found",
            ExportField::Store => "Store (City, State)",
            ExportField::PurchaseDate => "Purchase Date",
            ExportField::ImageUrl => "Image URL",
            ExportField::Notes => "Notes",
            ExportField::InternetSku => "Internet SKU",
        }
    }

    /// Stable name used in merge statistics.
    pub fn key(&self) -> &'static str {
        match self {
            ExportField::Timestamp => "timestamp",
            ExportField::Email => "email",
            ExportField::ItemName => "item_name",
            ExportField::Sku => "sku",
            ExportField::Quantity => "quantity",
            ExportField::Store => "store",
            ExportField::PurchaseDate => "purchase_date",
            ExportField::ImageUrl => "image_url",
            ExportField::Notes => "notes",
            ExportField::InternetSku => "internet_sku",
        }
    }

    pub fn value<'r>(&self, row: &'r ExportRow) -> &'r str {
        match self {
            ExportField::Timestamp => &row.timestamp,
            ExportField::Email => &row.email,
            ExportField::ItemName => &row.item_name,
            ExportField::Sku => &row.sku,
            ExportField::Quantity => &row.quantity,
            ExportField::Store => &row.store,
            ExportField::PurchaseDate => &row.purchase_date,
            ExportField::ImageUrl => &row.image_url,
            ExportField::Notes => &row.notes,
            ExportField::InternetSku => &row.internet_sku,
        }
    }

    pub fn value_mut<'r>(&self, row: &'r mut ExportRow) -> &'r mut String {
        match self {
            ExportField::Timestamp => &mut row.timestamp,
            ExportField::Email => &mut row.email,
            ExportField::ItemName => &mut row.item_name,
            ExportField::Sku => &mut row.sku,
            ExportField::Quantity => &mut row.quantity,
            ExportField::Store => &mut row.store,
            ExportField::PurchaseDate => &mut row.purchase_date,
            ExportField::ImageUrl => &mut row.image_url,
            ExportField::Notes => &mut row.notes,
            ExportField::InternetSku => &mut row.internet_sku,
        }
    }
}

/// Who an export file is written for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportAudience {
    /// Public-facing feed; never carries the Internet SKU
    PublicFeed,
    /// Full backend import
    Backend,
}

impl ExportAudience {
    pub fn fields(&self) -> Vec<ExportField> {
        ExportField::ALL
            .into_iter()
            .filter(|f| *self == ExportAudience::Backend || *f != ExportField::InternetSku)
            .collect()
    }
}

/// One row of the canonical export. Every value is kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub timestamp: String,
    pub email: String,
    pub item_name: String,
    pub sku: String,
    pub quantity: String,
    pub store: String,
    pub purchase_date: String,
    pub image_url: String,
    pub notes: String,
    pub internet_sku: String,
}

impl ExportRow {
    pub fn get(&self, field: ExportField) -> &str {
        field.value(self)
    }

    pub fn set(&mut self, field: ExportField, value: impl Into<String>) {
        *field.value_mut(self) = value.into();
    }

    pub fn with(mut self, field: ExportField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn quantity_value(&self) -> i64 {
        self.quantity.trim().parse::<i64>().unwrap_or(0)
    }
}

impl Mergeable for ExportRow {
    fn sku_text(&self) -> &str {
        &self.sku
    }

    fn populated_fields(&self) -> Vec<&'static str> {
        ExportField::ALL
            .into_iter()
            .filter(|f| *f != ExportField::Sku && !f.value(self).trim().is_empty())
            .map(|f| f.key())
            .collect()
    }

    fn merge(&self, incoming: &Self, rules: &MergeRules) -> Merged<Self> {
        let mut value = self.clone();
        let mut enriched = Vec::new();

        for field in ExportField::ALL {
            let current = field.value(self);
            let offered = field.value(incoming);
            let update = match field {
                ExportField::Sku => None,
                ExportField::Notes => merge_note(current, offered, rules),
                ExportField::PurchaseDate if rules.latest_wins_purchase_date => {
                    later_date(current, offered)
                },
                _ => fill_text(current, offered),
            };
            if let Some(updated) = update {
                *field.value_mut(&mut value) = updated;
                enriched.push(field.key());
            }
        }

        Merged { value, enriched }
    }

    fn rank(&self) -> BatchRank {
        BatchRank {
            note_len: self.notes.trim().chars().count(),
            quantity: self.quantity_value(),
            timestamp: parse_sheet_timestamp(&self.timestamp),
        }
    }
}

/// `Some(offered)` when it is a strictly later date, or fills a blank.
fn later_date(current: &str, offered: &str) -> Option<String> {
    if let Some(filled) = fill_text(current, offered) {
        return Some(filled);
    }
    match (parse_sheet_date(current), parse_sheet_date(offered)) {
        (Some(a), Some(b)) if b > a => Some(offered.trim().to_string()),
        _ => None,
    }
}

// Two-digit years are tried first; `%Y` would read "25" as year 25.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse dates as they appear in sheet exports.
pub fn parse_sheet_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let date_part = text.split_whitespace().next().unwrap_or(text);
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

/// Parse form timestamps such as `1/15/2025 9:30:00`.
pub fn parse_sheet_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    ["%m/%d/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| parse_sheet_date(text).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Read export rows, resolving each column through its header aliases.
/// Columns that are not present read as empty.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<ExportRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let columns: Vec<(ExportField, usize)> = ExportField::ALL
        .into_iter()
        .filter_map(|field| resolve_column(&headers, export_candidates(field)).map(|i| (field, i)))
        .collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let mut row = ExportRow::default();
        for (field, index) in &columns {
            if let Some(value) = record.get(*index) {
                row.set(*field, value.trim());
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_rows_from_path(path: impl AsRef<Path>) -> Result<Vec<ExportRow>> {
    read_rows(File::open(path)?)
}

pub fn write_rows<W: Write>(writer: W, rows: &[ExportRow], audience: ExportAudience) -> Result<()> {
    let fields = audience.fields();
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(fields.iter().map(|f| f.header()))?;
    for row in rows {
        csv_writer.write_record(fields.iter().map(|f| f.value(row)))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write rows to `path`, creating parent directories as needed.
pub fn write_rows_to_path(
    path: impl AsRef<Path>,
    rows: &[ExportRow],
    audience: ExportAudience,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_rows(File::create(path)?, rows, audience)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn row(sku: &str) -> ExportRow {
        ExportRow::default().with(ExportField::Sku, sku)
    }

    #[test]
    fn test_read_legacy_headers() {
        let data = "\u{feff}Timestamp,Email Address,Item Name,Home Depot SKU (6 or 10 digits),Exact Quantity Found,\"Store (City, State)\",Purchase Date,IMAGE URL,Notes (Optional),INTERNET SKU\n\
                    1/2/2025 10:00:00,,Hammer,123456,2,\"Atlanta, GA\",2025-01-02,http://img,dented,1000123456\n";
        let rows = read_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.timestamp, "1/2/2025 10:00:00");
        assert_eq!(r.sku, "123456");
        assert_eq!(r.store, "Atlanta, GA");
        assert_eq!(r.image_url, "http://img");
        assert_eq!(r.notes, "dented");
        assert_eq!(r.internet_sku, "1000123456");
    }

    #[test]
    fn test_written_rows_read_back_identically() {
        let rows = vec![
            row("123456")
                .with(ExportField::Timestamp, "1/2/2025 10:00:00")
                .with(ExportField::Email, "a@example.com")
                .with(ExportField::ItemName, "Hammer, claw")
                .with(ExportField::Quantity, "2")
                .with(ExportField::Store, "Atlanta, GA")
                .with(ExportField::Notes, "dented; \"as is\"")
                .with(ExportField::InternetSku, "1000123456"),
            row("1234567890").with(ExportField::PurchaseDate, "2025-01-02"),
        ];
        let mut out = Vec::new();
        write_rows(&mut out, &rows, ExportAudience::Backend).unwrap();
        let read = read_rows(out.as_slice()).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn test_missing_columns_read_empty() {
        let rows = read_rows("SKU,Notes\n123456,hi\n".as_bytes()).unwrap();
        assert_eq!(rows[0].sku, "123456");
        assert_eq!(rows[0].notes, "hi");
        assert_eq!(rows[0].internet_sku, "");
    }

    #[test]
    fn test_public_feed_omits_internet_sku() {
        let rows = vec![row("123456").with(ExportField::InternetSku, "1000123456")];
        let mut public = Vec::new();
        write_rows(&mut public, &rows, ExportAudience::PublicFeed).unwrap();
        let public = String::from_utf8(public).unwrap();
        assert!(!public.contains("Internet SKU"));
        assert!(!public.contains("1000123456"));

        let mut backend = Vec::new();
        write_rows(&mut backend, &rows, ExportAudience::Backend).unwrap();
        let backend = String::from_utf8(backend).unwrap();
        assert!(backend.lines().next().unwrap().ends_with("Internet SKU"));
        assert!(backend.contains("1000123456"));
    }

    #[test]
    fn test_merge_fills_blanks_only() {
        let existing = row("123456").with(ExportField::ImageUrl, "http://x");
        let incoming = row("123456")
            .with(ExportField::ImageUrl, "http://y")
            .with(ExportField::InternetSku, "1009991234");
        let merged = existing.merge(&incoming, &MergeRules::default());
        assert_eq!(merged.value.image_url, "http://x");
        assert_eq!(merged.value.internet_sku, "1009991234");
        assert_eq!(merged.enriched, vec!["internet_sku"]);
    }

    #[test]
    fn test_merge_with_self_is_unchanged() {
        let existing = row("123456")
            .with(ExportField::Notes, "scratched")
            .with(ExportField::Quantity, "2");
        let merged = existing.merge(&existing, &MergeRules::default());
        assert!(merged.is_unchanged());
        assert_eq!(merged.value, existing);
    }

    #[test]
    fn test_latest_purchase_date_wins_when_enabled() {
        let existing = row("123456").with(ExportField::PurchaseDate, "2025-01-02");
        let incoming = row("123456").with(ExportField::PurchaseDate, "2025-03-04");

        let plain = existing.merge(&incoming, &MergeRules::default());
        assert_eq!(plain.value.purchase_date, "2025-01-02");

        let rules = MergeRules::default().with_latest_purchase_date();
        let latest = existing.merge(&incoming, &rules);
        assert_eq!(latest.value.purchase_date, "2025-03-04");

        let older = incoming.merge(&existing, &rules);
        assert!(older.is_unchanged());
    }

    #[test]
    fn test_sheet_dates() {
        assert_eq!(parse_sheet_date("1/15/2025"), NaiveDate::from_ymd_opt(2025, 1, 15));
        assert_eq!(parse_sheet_date("2025-01-15 10:00"), NaiveDate::from_ymd_opt(2025, 1, 15));
        assert!(parse_sheet_timestamp("1/15/2025 9:30:00").is_some());
        assert!(parse_sheet_timestamp("").is_none());
    }
}
