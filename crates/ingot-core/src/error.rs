//! Error types and result aliases for ingot.
//!
//! This module defines the shared error types used across all ingot components.
//! Errors are structured for programmatic handling and include context for
//! debugging. A failed put condition is NOT represented here: CAS
//! conflicts are a normal outcome and surface as
//! [`PutOutcome::Rejected`](crate::storage::PutOutcome).

use std::fmt;

/// The result type used throughout ingot.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ingot operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A key or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A precondition for the operation was not met.
    ///
    /// Used for lock-protocol violations and invalid state transitions.
    /// Object-store CAS conflicts do not use this variant.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new not-found error for the given key.
    #[must_use]
    pub fn not_found(key: impl fmt::Display) -> Self {
        Self::NotFound(key.to_string())
    }

    /// Returns true when the error is transient and a retry may succeed.
    ///
    /// Only raw storage failures are considered transient; logical errors
    /// (not-found, invalid input, serialization) never are.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}
