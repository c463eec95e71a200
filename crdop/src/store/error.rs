//! Store error types.

use thiserror::Error;

/// Errors reported by a resource store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource with the same key already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    /// Payload rejected by validation.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Store cannot be reached or refused to serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
