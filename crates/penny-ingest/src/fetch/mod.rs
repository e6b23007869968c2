//! Partition-by-partition fetch from the upstream listings API

pub mod client;
pub mod diagnostics;

pub use client::{FetchReport, PartitionFetcher};
pub use diagnostics::{
    FailureClassifier, FailureHint, FetchErrorKind, HeuristicClassifier, PartitionOutcome,
    PartitionResult,
};
