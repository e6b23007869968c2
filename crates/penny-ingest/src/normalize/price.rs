//! Price parsing and display formatting
//!
//! Upstream prices arrive as numbers or strings, in dollars or in integer
//! cents. Values above [`CENTS_THRESHOLD`] are read as cents.

use serde_json::Value;

/// Values strictly greater than this are cents.
pub const CENTS_THRESHOLD: f64 = 1000.0;

/// Shown when no price field is present.
pub const NO_PRICE: &str = "N/A";

/// Numeric value of a price field, accepting "$1,234.50" style strings.
pub fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.replace(['$', ','], "");
            let cleaned = cleaned.trim();
            if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("n/a") {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        },
        _ => None,
    }
}

/// Convert to major units, dividing cents by 100.
pub fn to_major_units(amount: f64, always_cents: bool) -> f64 {
    if always_cents || amount > CENTS_THRESHOLD {
        amount / 100.0
    } else {
        amount
    }
}

/// Positive retail price in major units.
pub fn retail_price(value: &Value) -> Option<f64> {
    parse_amount(value)
        .filter(|v| *v > 0.0)
        .map(|v| to_major_units(v, false))
}

/// Display string for a resolved price field.
///
/// Unparsable values pass through as their text rather than failing.
pub fn display_price(value: Option<&Value>, always_cents: bool) -> String {
    let Some(value) = value else {
        return NO_PRICE.to_string();
    };
    match parse_amount(value) {
        Some(amount) => format!("${:.2}", to_major_units(amount, always_cents)),
        None => match value {
            Value::String(s) => s.trim().to_string(),
            Value::Null => NO_PRICE.to_string(),
            other => other.to_string(),
        },
    }
}
