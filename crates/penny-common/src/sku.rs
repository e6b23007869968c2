//! Store SKU normalization
//!
//! A SKU is accepted only when, after removing every non-digit character, it
//! is exactly 6 digits (store SKU) or exactly 10 digits (internet-style SKU).
//! Anything else is rejected; values are never padded or truncated to fit.

use crate::error::{PennyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a store SKU.
pub const STORE_SKU_LEN: usize = 6;

/// Length of a 10-digit SKU.
pub const LONG_SKU_LEN: usize = 10;

/// A validated SKU: digits only, length 6 or 10.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    /// Normalize `raw` to digits and validate its length.
    pub fn parse(raw: &str) -> Result<Self> {
        let digits = to_digits(raw);
        if digits.is_empty() {
            return Err(PennyError::InvalidSku {
                raw: raw.to_string(),
                reason: "no digits".to_string(),
            });
        }
        if digits.len() != STORE_SKU_LEN && digits.len() != LONG_SKU_LEN {
            return Err(PennyError::InvalidSku {
                raw: raw.to_string(),
                reason: format!("expected 6 or 10 digits, found {}", digits.len()),
            });
        }
        Ok(Sku(digits))
    }

    /// True if `value` is already a canonical SKU (no normalization applied).
    pub fn is_canonical(value: &str) -> bool {
        let len = value.len();
        (len == STORE_SKU_LEN || len == LONG_SKU_LEN) && value.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sku {
    type Error = PennyError;

    fn try_from(value: String) -> Result<Self> {
        Sku::parse(&value)
    }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self {
        sku.0
    }
}

impl AsRef<str> for Sku {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip everything that is not an ASCII digit.
pub fn to_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}
