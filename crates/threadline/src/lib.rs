//! # Threadline
//!
//! Client-side synchronization and conflict resolution for a
//! conversational messaging SDK.
//!
//! ## Overview
//!
//! Threadline keeps a local cache of conversations, messages, participants
//! and delivery statuses consistent with an authoritative remote service:
//!
//! - **Sync**: reconcile the conversation list, then backfill each
//!   conversation's event stream from its local high-water mark
//! - **Push**: apply live events in order; a skipped event id triggers a
//!   scoped background backfill, guarded by a rate limiter
//! - **Send**: optimistic placeholders, concurrent attachment uploads with
//!   per-attachment failure, atomic promotion on success
//! - **Conflicts**: a stale version refetches and merges the conversation,
//!   then reports [`EngineError::ConflictRefreshed`]
//!
//! ## Key Concepts
//!
//! - **Event id**: per-conversation, monotonically increasing; `-1` means
//!   unknown.
//! - **High-water marks**: `last_local_event_id` and
//!   `latest_remote_event_id` only ever move forward.
//! - **Upgrade-only statuses**: `Sent < Delivered < Read`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use threadline::{EngineConfig, Session, SyncOrchestrator};
//! use threadline::core::{MessagePart, ProfileId};
//! use threadline::store::MemoryStore;
//! use threadline::sync::MemoryRemote;
//!
//! async fn example() -> threadline::Result<()> {
//!     let engine = SyncOrchestrator::new(
//!         Arc::new(MemoryRemote::new()),
//!         Arc::new(MemoryStore::new()),
//!         Session::new(ProfileId::new("me")),
//!         EngineConfig::default(),
//!     );
//!
//!     let report = engine.synchronize_all().await?;
//!     for conversation in engine.conversations().await? {
//!         let outcome = engine
//!             .send_message(&conversation.id, vec![MessagePart::text("hi")], Vec::new())
//!             .await?;
//!         println!("sent: {}", outcome.is_success());
//!     }
//!     println!("sync ok: {}", report.success());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `threadline::core` - Data model and pure algorithms
//! - `threadline::store` - Local store contract and persistence gateway
//! - `threadline::sync` - Remote service contract and backfill engine

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod send;
pub mod session;

// Re-export component crates
pub use threadline_core as core;
pub use threadline_store as store;
pub use threadline_sync as sync;

pub use config::{EngineConfig, RetryConfig, SendConfig};
pub use error::{EngineError, Result};
pub use orchestrator::{BackgroundReport, IncomingOutcome, SyncOrchestrator, SyncReport};
pub use send::{AttachmentInput, SendOutcome, SendPipeline};
pub use session::Session;

// Re-export commonly used core types
pub use threadline_core::{
    ConversationId, ConversationMeta, ConversationRecord, DeliveryStatus, EventId, IncomingEvent,
    MessageId, MessagePart, MessageRecord, ProfileId,
};
pub use tokio_util::sync::CancellationToken;
