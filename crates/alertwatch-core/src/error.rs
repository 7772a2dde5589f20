//! Error types for alert normalization.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning a raw document into an [`Alert`](crate::Alert).
#[derive(Error, Debug)]
pub enum Error {
    /// A required field is absent from an open alert document.
    #[error("alert {doc_id}: missing field '{field}'")]
    MissingField {
        /// The `_id` of the offending document.
        doc_id: String,
        /// Dotted path of the missing field.
        field: &'static str,
    },

    /// A required field is present but has the wrong shape.
    #[error("alert {doc_id}: invalid field '{field}': {reason}")]
    InvalidField {
        /// The `_id` of the offending document.
        doc_id: String,
        /// Dotted path of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Normalization failures are reported per document and never abort a run.
pub type NormalizeError = Error;
