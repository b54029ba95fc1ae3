//! # Threadline Core
//!
//! Data model and pure algorithms for the Threadline messaging sync engine.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! deterministic and can be tested without a runtime.
//!
//! ## Key Types
//!
//! - [`ConversationRecord`] - A cached conversation with local/remote event bounds
//! - [`MessageRecord`] - A message, possibly still a pending placeholder
//! - [`MessageStatusRecord`] - Upgrade-only delivery status per profile
//! - [`IncomingEvent`] - Tagged push event, one case per kind
//! - [`OrphanedEvent`] - A status waiting for its message
//!
//! ## Algorithms
//!
//! - [`reconcile`] / [`reconcile_single`] - Remote vs. local conversation diff
//! - [`merge_conversation`] - The conversation upsert merge rule
//! - [`CallRateLimiter`] - Two-tier burst/volume guard

pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod participant;
pub mod rate_limit;
pub mod reconcile;
pub mod status;
pub mod types;

pub use conversation::{merge_conversation, ConversationMeta, ConversationRecord, ConversationSummary};
pub use error::{CoreError, Result};
pub use event::{EventKind, IncomingEvent, OrphanedEvent, RemoteEvent};
pub use message::{MessagePart, MessageRecord, SendState};
pub use participant::ParticipantRecord;
pub use rate_limit::{CallRateLimiter, RateDecision, RateLimitConfig};
pub use reconcile::{reconcile, reconcile_single, Reconciliation};
pub use status::{DeliveryStatus, MessageStatusRecord};
pub use types::{ConversationId, EventId, MessageId, ProfileId, VersionToken};
