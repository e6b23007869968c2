//! Ordered candidate-field tables
//!
//! Upstream records and exported sheets name the same fact differently
//! depending on source and vintage. Each canonical field resolves through a
//! fixed, ordered list of candidate names; the first candidate present with a
//! non-empty value wins. These tables are the only place aliases live: the
//! normalizer, the identity builder, and the CSV readers all consult them.

use crate::export::ExportField;

/// Candidate names for each canonical field of an upstream item
#[derive(Debug, Clone, Copy)]
pub struct UpstreamAliases {
    pub sku: &'static [&'static str],
    pub internet_number: &'static [&'static str],
    pub barcode_upc: &'static [&'static str],
    pub item_name: &'static [&'static str],
    pub brand: &'static [&'static str],
    pub retail_price: &'static [&'static str],
    /// `price_cents` is always integer cents; the others use the magnitude rule.
    pub display_price: &'static [&'static str],
    pub image_url: &'static [&'static str],
    pub product_link: &'static [&'static str],
    pub stock: &'static [&'static str],
    pub listed_date: &'static [&'static str],
    pub location: &'static [&'static str],
    pub store_name: &'static [&'static str],
}

pub const UPSTREAM_ALIASES: UpstreamAliases = UpstreamAliases {
    sku: &["store_sku", "storeSku", "sku", "sku_number"],
    internet_number: &["internet_sku", "internetNumber", "internet_number"],
    barcode_upc: &["upc", "barcode", "gtin"],
    item_name: &["item_name", "name", "title"],
    brand: &["brand"],
    retail_price: &["retail_price", "retailPrice", "list_price", "msrp"],
    display_price: &["price", "current_price", "offer_price", "price_cents"],
    image_url: &["image_link", "image_url", "imageUrl", "image", "thumbnail"],
    product_link: &[
        "home_depot_url",
        "homeDepotUrl",
        "productUrl",
        "product_link",
        "product_url",
    ],
    stock: &["stock", "total_stock", "on_hand", "quantity"],
    listed_date: &["dropped_at", "date_pennied", "updated_at"],
    location: &["location", "aisle", "location_description"],
    store_name: &["store_name", "storeName"],
};

/// Upstream field that is always expressed in integer cents.
pub const CENTS_FIELD: &str = "price_cents";

/// Candidate column headers for each export field, most canonical first.
///
/// Headers are compared with [`normalize_header`], so case and whitespace
/// differences never matter.
pub fn export_candidates(field: ExportField) -> &'static [&'static str] {
    match field {
        ExportField::Timestamp => &["Timestamp"],
        ExportField::Email => &["Email Address", "Email"],
        ExportField::ItemName => &["Item Name", "SKU Description", "Product Name"],
        ExportField::Sku => &[
            "SKU (6 or 10 digits)",
            "Home Depot SKU (6 or 10 digits)",
            "SKU Number",
            "Sku Number",
            "SKU",
        ],
        ExportField::Quantity => &["Exact Quantity Found", "Quantity"],
        ExportField::Store => &["Store (City, State)", "Store", "State"],
        ExportField::PurchaseDate => &["Purchase Date", "Date Purchased", "Date"],
        ExportField::ImageUrl => &[
            "Image URL",
            "Upload Photo(s) of Item / Shelf Tag / Receipt",
        ],
        ExportField::Notes => &["Notes", "Notes (Optional)"],
        ExportField::InternetSku => &[
            "Internet SKU",
            "internetSku (private, backend only)",
        ],
    }
}

/// Candidate column headers of a purchase-history export
#[derive(Debug, Clone, Copy)]
pub struct PurchaseAliases {
    pub date: &'static [&'static str],
    pub sku: &'static [&'static str],
    pub item_name: &'static [&'static str],
    pub internet_sku: &'static [&'static str],
    pub unit_price: &'static [&'static str],
}

pub const PURCHASE_ALIASES: PurchaseAliases = PurchaseAliases {
    date: &["Date Purchased", "Date"],
    sku: &["SKU Number", "SKU", "Sku Number"],
    item_name: &["Item Name", "SKU Description", "Product Name"],
    internet_sku: &["Internet SKU"],
    unit_price: &["Price", "Net Unit Price", "Unit Price"],
};

/// Lowercase with all whitespace removed.
pub fn normalize_header(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Resolve `candidates` against a header row, returning the column index of
/// the first candidate present.
pub fn resolve_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    candidates.iter().find_map(|candidate| {
        let target = normalize_header(candidate);
        normalized.iter().position(|h| *h == target)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header_ignores_spacing_and_case() {
        assert_eq!(
            normalize_header("Store(City,State)"),
            normalize_header(" store (city, STATE) ")
        );
    }

    #[test]
    fn test_resolve_column_respects_candidate_order() {
        let headers = vec![
            "SKU".to_string(),
            "Home Depot SKU (6 or 10 digits)".to_string(),
        ];
        let idx = resolve_column(&headers, export_candidates(ExportField::Sku)).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_resolve_column_missing() {
        let headers = vec!["Foo".to_string()];
        assert!(resolve_column(&headers, export_candidates(ExportField::Notes)).is_none());
    }

    #[test]
    fn test_legacy_headers_resolve() {
        let headers = vec!["IMAGE URL".to_string(), "INTERNET SKU".to_string()];
        assert_eq!(resolve_column(&headers, export_candidates(ExportField::ImageUrl)), Some(0));
        assert_eq!(
            resolve_column(&headers, export_candidates(ExportField::InternetSku)),
            Some(1)
        );
    }
}
