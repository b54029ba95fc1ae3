//! # Threadline Sync
//!
//! The remote side of the engine: the remote messaging service contract,
//! the event backfill engine, and push stream gap tracking.
//!
//! ## Overview
//!
//! - [`RemoteService`] - Every remote call, answering with a [`RemoteResponse`]
//! - [`BackfillEngine`] - Pages a conversation's event stream into the store
//!   through the persistence gateway, bounded by a per-conversation call
//!   ceiling and a per-cycle conversation cap
//! - [`MissingEventTracker`] - Per-conversation counters that turn a skipped
//!   push event into a scoped range backfill
//!
//! ## Backfill Flow
//!
//! ```text
//! last_local + 1 ──> query_events(page) ──> apply_events (one tx)
//!        ^                                        |
//!        └──────── last_event_id + 1 <────────────┘
//!                  until short page or ceiling
//! ```

pub mod backfill;
pub mod error;
pub mod remote;
pub mod tracker;

pub use backfill::{BackfillConfig, BackfillEngine, BackfillReport, BackfillSummary};
pub use error::{Result, SyncError};
pub use remote::{
    memory::MemoryRemote, AttachmentUpload, FieldFailure, NewConversation, OutgoingMessage,
    RemoteResponse, RemoteService, SentMessage, UploadedAttachment, STATUS_VERSION_CONFLICT,
};
pub use tracker::{GapCheck, MissingEventTracker};
