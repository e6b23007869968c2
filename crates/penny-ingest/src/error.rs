//! Error types for the ingestion pipelines

use crate::fetch::FailureHint;
use crate::reconcile::IntegrityError;
use crate::summary::Stage;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Empty API response. {}", .hint.message())]
    NoItems { hint: FailureHint },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] penny_common::PennyError),
}

impl HarvestError {
    pub fn config(message: impl Into<String>) -> Self {
        HarvestError::Config(message.into())
    }

    pub fn store(message: impl std::fmt::Display) -> Self {
        HarvestError::Store(message.to_string())
    }

    /// Pipeline stage this error belongs to, for the run summary.
    pub fn stage(&self) -> Stage {
        match self {
            HarvestError::Config(_)
            | HarvestError::Client(_)
            | HarvestError::Migration(_)
            | HarvestError::Pattern(_) => Stage::Setup,
            HarvestError::NoItems { .. } => Stage::Fetch,
            HarvestError::Integrity(_) => Stage::Validate,
            HarvestError::Store(_) | HarvestError::Database(_) => Stage::Persist,
            HarvestError::Csv(_) | HarvestError::Io(_) | HarvestError::Json(_) => Stage::Load,
            HarvestError::Common(penny_common::PennyError::Config(_)) => Stage::Setup,
            HarvestError::Common(_) => Stage::Load,
        }
    }
}
