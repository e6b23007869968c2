//! Error types shared by the penny crates

use thiserror::Error;

/// Result type alias for shared penny operations
pub type Result<T> = std::result::Result<T, PennyError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum PennyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid SKU '{raw}': {reason}")]
    InvalidSku { raw: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl PennyError {
    pub fn config(message: impl Into<String>) -> Self {
        PennyError::Config(message.into())
    }
}
