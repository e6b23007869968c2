//! Penny Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the penny ingestion tools.
//!
//! # Overview
//!
//! - **Error Handling**: [`PennyError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **SKU**: the [`Sku`] newtype enforcing the 6/10-digit rule
//!
//! # Example
//!
//! ```
//! use penny_common::Sku;
//!
//! let sku = Sku::parse("123-456").unwrap();
//! assert_eq!(sku.as_str(), "123456");
//! assert!(Sku::parse("12345").is_err());
//! ```

pub mod error;
pub mod logging;
pub mod sku;

// Re-export commonly used types
pub use error::{PennyError, Result};
pub use sku::Sku;
