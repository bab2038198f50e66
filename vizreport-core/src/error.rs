//! Error types for vizreport-core

use thiserror::Error;

/// Main error type for the vizreport-core library
#[derive(Error, Debug)]
pub enum Error {
    /// A data source or metric hook that was never implemented.
    ///
    /// This is a catalog/registration defect and always aborts the run.
    #[error("{owner} does not implement {capability}")]
    Unimplemented { owner: String, capability: String },

    /// The join column needed to align a grouped result is missing
    #[error("field '{field}' not found in result of {source_id}")]
    MissingJoinField { source_id: String, field: String },

    /// A study does not follow the standard study calling convention
    #[error("study {0} does not support the standard study API")]
    StudyUnsupported(String),

    /// A study raised an error while computing
    #[error("study {study} failed: {message}")]
    Study { study: String, message: String },

    /// A metric query failed
    #[error("metric {metric} failed: {message}")]
    Metric { metric: String, message: String },

    /// Date could not be parsed or is out of range
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build an [`Error::Unimplemented`] for `owner`'s `capability`.
    pub fn unimplemented(owner: impl Into<String>, capability: impl Into<String>) -> Self {
        Error::Unimplemented {
            owner: owner.into(),
            capability: capability.into(),
        }
    }

    /// Whether this error must abort the whole report run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unimplemented { .. })
    }
}

/// Result type alias for vizreport-core
pub type Result<T> = std::result::Result<T, Error>;
