//! Error types for the sync module.

use thiserror::Error;

use threadline_core::VersionToken;

use crate::remote::FieldFailure;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote call failed. Surfaced as-is.
    #[error("network failure (status {status_code}): {message}")]
    Network { status_code: u16, message: String },

    /// The remote resource moved on since the version we sent.
    #[error("version conflict (server version {version:?})")]
    VersionConflict { version: Option<VersionToken> },

    /// Field-level validation failures. Never retried.
    #[error("validation failed: {}", format_failures(.0))]
    Validation(Vec<FieldFailure>),

    /// Local store operation failed.
    #[error("store error: {0}")]
    Store(#[from] threadline_store::StoreError),

    /// The remote reported success without the payload it owes us.
    #[error("missing payload in {0} response")]
    MissingPayload(&'static str),

    /// A backfill task died before reporting.
    #[error("backfill task failed: {0}")]
    TaskFailed(String),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }
}

fn format_failures(failures: &[FieldFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
