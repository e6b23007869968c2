//! Purchase-history files imported from disk and written as sheet rows

mod common;

use chrono::NaiveDate;
use common::init_tracing;
use penny_ingest::export::{read_rows_from_path, write_rows_to_path, ExportAudience, ExportRow};
use penny_ingest::purchase_history::PurchaseHistoryImporter;
use std::fs;
use tempfile::TempDir;

const RECEIPTS: &str = "\
Purchase History Report
Generated 2025-03-01
Date Purchased,SKU Number,SKU Description,Internet SKU,Net Unit Price
01/05/2025,123456,Drill,1009991234,$0.01
02/10/2025,123456,Drill,1009991234,0.01
02/11/2025,654321,Saw,,5.99
,777777,Level,,0.01
03/01/2025,222222,Hammer,0,0.01
";

#[test]
fn test_import_keeps_latest_penny_purchase_per_sku() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("GA_orders.csv");
    fs::write(&path, RECEIPTS).unwrap();

    let file = PurchaseHistoryImporter::new().unwrap().import_path(&path).unwrap();

    assert_eq!(file.read, 5);
    assert_eq!(file.skipped, 2);
    assert_eq!(file.deduplicated, 1);

    let skus: Vec<&str> = file.rows.iter().map(|r| r.sku.as_str()).collect();
    assert_eq!(skus, vec!["222222", "123456"]);
    assert_eq!(file.rows[1].purchase_date, NaiveDate::from_ymd_opt(2025, 2, 10).unwrap());
    assert!(file.rows.iter().all(|r| r.state == "GA"));
    assert_eq!(file.rows[0].internet_sku, "");
    assert_eq!(file.rows[1].internet_sku, "1009991234");
}

#[test]
fn test_forced_state_and_sheet_round_trip() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("receipts-2025.csv");
    fs::write(&path, RECEIPTS).unwrap();

    let importer = PurchaseHistoryImporter::new().unwrap().with_forced_state("tx");
    let file = importer.import_path(&path).unwrap();
    let rows: Vec<ExportRow> = file.rows.iter().map(ExportRow::from).collect();

    let out = dir.path().join("out/purchases.csv");
    write_rows_to_path(&out, &rows, ExportAudience::Backend).unwrap();
    let read_back = read_rows_from_path(&out).unwrap();

    assert_eq!(read_back, rows);
    assert!(read_back.iter().all(|r| r.store == "TX"));
    assert_eq!(read_back[1].purchase_date, "2025-02-10");
    assert_eq!(read_back[1].item_name, "Drill");
}

#[test]
fn test_state_inferred_from_full_state_name() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("export_new_hampshire.csv");
    fs::write(&path, RECEIPTS).unwrap();

    let file = PurchaseHistoryImporter::new().unwrap().import_path(&path).unwrap();
    assert!(file.rows.iter().all(|r| r.state == "NH"));
}

#[test]
fn test_file_without_header_yields_nothing() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("GA_empty.csv");
    fs::write(&path, "just,some,cells\n1,2,3\n").unwrap();

    let file = PurchaseHistoryImporter::new().unwrap().import_path(&path).unwrap();
    assert!(file.rows.is_empty());
    assert_eq!(file.read, 0);
}
