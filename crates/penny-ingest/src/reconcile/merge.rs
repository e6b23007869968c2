//! Pure fill-only merge
//!
//! `merge(existing, incoming)` never mutates either side. It returns the merged
//! value along with the names of the fields that were filled, and the caller
//! decides whether to replace its index entry.

use crate::normalize::price::NO_PRICE;
use crate::normalize::{CanonicalRecord, StockCount};
use chrono::NaiveDateTime;

/// Separator used when two differing notes are combined.
pub const NOTE_SEPARATOR: &str = "; ";

/// Prefixes marking annotation-style notes. An incoming annotation is
/// dropped when the existing text already carries the same marker.
pub const ANNOTATION_MARKERS: &[&str] = &["Brand="];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRules {
    /// Let a strictly more recent purchase date replace an existing one.
    pub latest_wins_purchase_date: bool,
    pub note_separator: &'static str,
    pub annotation_markers: &'static [&'static str],
}

impl Default for MergeRules {
    fn default() -> Self {
        Self {
            latest_wins_purchase_date: false,
            note_separator: NOTE_SEPARATOR,
            annotation_markers: ANNOTATION_MARKERS,
        }
    }
}

impl MergeRules {
    /// Opt in to replacing a purchase date with a strictly later one. This
    /// is the only rule that overwrites a populated field.
    pub fn with_latest_purchase_date(mut self) -> Self {
        self.latest_wins_purchase_date = true;
        self
    }
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<R> {
    pub value: R,
    /// Fields whose value changed, in field order
    pub enriched: Vec<&'static str>,
}

impl<R> Merged<R> {
    pub fn is_unchanged(&self) -> bool {
        self.enriched.is_empty()
    }
}

/// A record that can take part in reconciliation
pub trait Mergeable: Clone {
    /// SKU as stored on the record, for validation.
    fn sku_text(&self) -> &str;

    /// Names of the fields carrying a value, for insert statistics.
    fn populated_fields(&self) -> Vec<&'static str>;

    /// Fill-only merge of `incoming` into a copy of `self`.
    fn merge(&self, incoming: &Self, rules: &MergeRules) -> Merged<Self>;

    /// Preference used when two records collide inside one batch.
    fn rank(&self) -> BatchRank {
        BatchRank::default()
    }
}

/// Tie-break between same-key rows of one batch.
///
/// A longer note wins, then a higher quantity, then an earlier timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchRank {
    pub note_len: usize,
    pub quantity: i64,
    pub timestamp: Option<NaiveDateTime>,
}

impl BatchRank {
    pub fn outranks(&self, other: &BatchRank) -> bool {
        if self.note_len != other.note_len {
            return self.note_len > other.note_len;
        }
        if self.quantity != other.quantity {
            return self.quantity > other.quantity;
        }
        match (self.timestamp, other.timestamp) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

/// Merge two same-key rows of one batch: the higher-ranked row is the base,
/// the other fills its blanks. Equal ranks keep the first row as base.
pub fn pre_merge<R: Mergeable>(first: &R, second: &R, rules: &MergeRules) -> R {
    if second.rank().outranks(&first.rank()) {
        second.merge(first, rules).value
    } else {
        first.merge(second, rules).value
    }
}

/// `Some(incoming)` when the existing value is blank and the incoming is not.
pub fn fill_text(existing: &str, incoming: &str) -> Option<String> {
    (existing.trim().is_empty() && !incoming.trim().is_empty()).then(|| incoming.trim().to_string())
}

pub fn fill_option<T: Clone>(existing: &Option<T>, incoming: &Option<T>) -> Option<T> {
    match (existing, incoming) {
        (None, Some(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Note merge: fill when blank, otherwise append unless the incoming text is
/// already one or more whole segments of the existing note (or is an
/// annotation whose marker is already present).
pub fn merge_note(existing: &str, incoming: &str, rules: &MergeRules) -> Option<String> {
    let existing = existing.trim();
    let incoming = incoming.trim();
    if incoming.is_empty() {
        return None;
    }
    if existing.is_empty() {
        return Some(incoming.to_string());
    }
    if has_segment_run(existing, incoming, rules.note_separator) {
        return None;
    }
    let repeated_annotation = rules
        .annotation_markers
        .iter()
        .any(|marker| incoming.starts_with(marker) && existing.contains(marker));
    if repeated_annotation {
        return None;
    }
    Some(format!("{}{}{}", existing, rules.note_separator, incoming))
}

/// True when `needle` appears in `haystack` bounded by separators or the ends.
fn has_segment_run(haystack: &str, needle: &str, separator: &str) -> bool {
    let haystack = format!("{separator}{haystack}{separator}");
    haystack.contains(&format!("{separator}{needle}{separator}"))
}

fn fill_field<T: Clone>(
    target: &mut Option<T>,
    incoming: &Option<T>,
    name: &'static str,
    enriched: &mut Vec<&'static str>,
) {
    if let Some(v) = fill_option(target, incoming) {
        *target = Some(v);
        enriched.push(name);
    }
}

impl Mergeable for CanonicalRecord {
    fn sku_text(&self) -> &str {
        self.sku.as_str()
    }

    fn populated_fields(&self) -> Vec<&'static str> {
        let present = [
            ("internet_number", self.internet_number.is_some()),
            ("barcode_upc", self.barcode_upc.is_some()),
            ("item_name", self.item_name.is_some()),
            ("brand", self.brand.is_some()),
            ("retail_price", self.retail_price.is_some()),
            ("image_url", self.image_url.is_some()),
            ("product_link", self.product_link.is_some()),
            ("location", self.location.is_some()),
            ("store_name", self.store_name.is_some()),
            ("stock_count", self.stock_count != StockCount::Unknown),
            ("listed_date", self.listed_date.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    fn merge(&self, incoming: &Self, _rules: &MergeRules) -> Merged<Self> {
        let mut value = self.clone();
        let mut enriched = Vec::new();

        fill_field(&mut value.internet_number, &incoming.internet_number, "internet_number", &mut enriched);
        fill_field(&mut value.barcode_upc, &incoming.barcode_upc, "barcode_upc", &mut enriched);
        fill_field(&mut value.item_name, &incoming.item_name, "item_name", &mut enriched);
        fill_field(&mut value.brand, &incoming.brand, "brand", &mut enriched);
        fill_field(&mut value.retail_price, &incoming.retail_price, "retail_price", &mut enriched);
        fill_field(&mut value.image_url, &incoming.image_url, "image_url", &mut enriched);
        fill_field(&mut value.product_link, &incoming.product_link, "product_link", &mut enriched);
        fill_field(&mut value.location, &incoming.location, "location", &mut enriched);
        fill_field(&mut value.store_name, &incoming.store_name, "store_name", &mut enriched);

        if self.stock_count == StockCount::Unknown && incoming.stock_count != StockCount::Unknown {
            value.stock_count = incoming.stock_count;
            value.raw_stock_field = incoming.raw_stock_field.clone();
            enriched.push("stock_count");
        }
        if self.listed_date.is_none() && incoming.listed_date.is_some() {
            value.listed_date = incoming.listed_date;
            value.age_days = incoming.age_days;
            value.raw_date_field = incoming.raw_date_field.clone();
            enriched.push("listed_date");
        }
        if self.display_price == NO_PRICE && incoming.display_price != NO_PRICE {
            value.display_price = incoming.display_price.clone();
            enriched.push("display_price");
        }

        Merged { value, enriched }
    }

    fn rank(&self) -> BatchRank {
        BatchRank {
            quantity: self.stock_count.known().unwrap_or(0),
            ..BatchRank::default()
        }
    }
}
