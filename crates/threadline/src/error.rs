//! Error types for the engine.

use threadline_core::{ConversationId, VersionToken};
use threadline_store::StoreError;
use threadline_sync::{FieldFailure, SyncError};
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remote or backfill error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Local store error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The remote rejected a stale version. The local copy was refetched
    /// and merged; the caller decides whether to resubmit.
    #[error("version conflict on {conversation_id}, local state refreshed")]
    ConflictRefreshed {
        conversation_id: ConversationId,
        version: Option<VersionToken>,
    },

    /// Some conversations failed to backfill. Progress made is kept.
    #[error("sync incomplete: {} conversation(s) failed", failed.len())]
    PartialSync { failed: Vec<ConversationId> },

    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// A send was cancelled before it was transmitted.
    #[error("send cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session this engine was bound to has ended.
    #[error("session gone")]
    SessionGone,
}

impl EngineError {
    /// Whether the engine can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::SessionGone)
    }

    /// Field-level failures, if the remote rejected the request as invalid.
    pub fn validation_failures(&self) -> Option<&[FieldFailure]> {
        match self {
            EngineError::Sync(SyncError::Validation(failures)) => Some(failures),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
