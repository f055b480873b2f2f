//! Error types for pipeline operations.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during pipeline operations.
///
/// A lost CAS is NOT an error: the publisher reports it as a normal
/// [`PublishOutcome`](crate::publisher::PublishOutcome) and the driver maps
/// it to the `cas_conflict` result code.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A core storage or lock operation failed.
    #[error(transparent)]
    Core(#[from] ingot_core::Error),

    /// Parquet encoding or decoding failed.
    #[error("parquet error: {message}")]
    Parquet {
        /// Description of the Parquet failure.
        message: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The input data or configuration is invalid; no writes were attempted.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// Stored state violates an invariant the pipeline relies on.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },
}

impl PipelineError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
