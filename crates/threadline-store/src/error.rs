//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
///
/// The engine treats every variant the same way: the operation failed and
/// is not retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record encoding/decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] threadline_core::CoreError),

    /// A record the operation depends on is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lock guarding the store was poisoned.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// The transaction could not be committed.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
