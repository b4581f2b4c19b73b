use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The expected version did not match the stored version.
    #[error(
        "Concurrency conflict for {entity_type} {key}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        entity_type: String,
        key: String,
        expected: Version,
        actual: Version,
    },

    /// The record to delete does not exist.
    #[error("{entity_type} not found: {key}")]
    NotFound { entity_type: String, key: String },

    /// The backing store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for optimistic concurrency failures, which are safe to
    /// retry after re-reading the record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
