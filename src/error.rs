//! Error types for ethos-reputation

use thiserror::Error;

/// Result type for reputation operations
pub type Result<T> = std::result::Result<T, ReputationError>;

/// Crate-wide error variants.
///
/// Only `VersionConflict` is retryable (see [`crate::retry`]); every other
/// kind bubbles to the caller immediately with enough context to reproduce.
#[derive(Error, Debug)]
pub enum ReputationError {
    /// Malformed identifier or key grammar - caller's fault, never retried
    #[error("Format error: {0}")]
    Format(String),

    /// Handle rules, vote bounds, decay period bounds
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced document does not exist
    #[error("Not found: {collection}/{key}")]
    NotFound { collection: String, key: String },

    /// Optimistic write raced another writer
    #[error("Version conflict on {collection}/{key}: expected {expected}, found {found}")]
    VersionConflict {
        collection: String,
        key: String,
        expected: u64,
        found: u64,
    },

    /// Version-conflict retries exhausted; the write never landed
    #[error("Retries exhausted after {attempts} attempts: {context}")]
    RetriesExhausted { context: String, attempts: u32 },

    /// Entity already resolves to a live index under a different handle.
    /// Requires operator attention; never auto-resolved.
    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),

    /// Store adapter failure (IO, corruption)
    #[error("Store error: {0}")]
    Store(String),

    /// Document body encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ReputationError {
    /// Whether the bounded-retry combinator may retry this error
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, ReputationError::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for ReputationError {
    fn from(err: serde_json::Error) -> Self {
        ReputationError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for ReputationError {
    fn from(err: sled::Error) -> Self {
        ReputationError::Store(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ReputationError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ReputationError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ReputationError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ReputationError::Serialization(err.to_string())
    }
}
