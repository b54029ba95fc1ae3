//! The local store contract.
//!
//! The engine never talks to a storage engine directly. It goes through
//! [`LocalStore`] for reads and through [`StoreTransaction`] for every write,
//! so that a conversation update and its message/status writes commit
//! together.

use async_trait::async_trait;
use threadline_core::{
    ConversationId, ConversationRecord, EventId, MessageId, MessageRecord, MessageStatusRecord,
    OrphanedEvent, ParticipantRecord, ProfileId,
};

use crate::error::Result;

/// Read access and the transaction entry point.
///
/// # Design Notes
///
/// - **Transactions**: every mutation goes through [`LocalStore::begin`].
///   Dropping a transaction without committing discards its writes.
/// - **Read-your-own-writes**: reads through a transaction see its staged
///   writes.
/// - **Upserts**: every write is keyed by natural id, so repeating it is a
///   no-op.
/// - **Serialization**: the store does not order concurrent transactions;
///   callers that need it serialize their own (see `PersistenceGateway`).
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Committed reads
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<ConversationRecord>>;

    async fn list_conversations(&self) -> Result<Vec<ConversationRecord>>;

    /// Get a message with its statuses hydrated.
    async fn get_message(&self, id: &MessageId) -> Result<Option<MessageRecord>>;

    /// Messages of a conversation: confirmed ones by event id, pending last.
    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRecord>>;

    async fn list_statuses(&self, message_id: &MessageId) -> Result<Vec<MessageStatusRecord>>;

    async fn list_participants(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ParticipantRecord>>;

    async fn list_orphaned_events(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<OrphanedEvent>>;
}

/// A unit of work against the local store.
#[async_trait]
pub trait StoreTransaction: Send {
    // ─────────────────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_conversation(&mut self, id: &ConversationId) -> Result<Option<ConversationRecord>>;

    async fn upsert_conversation(&mut self, record: &ConversationRecord) -> Result<()>;

    /// Delete a conversation with its messages, statuses, participants and
    /// orphaned events.
    async fn delete_conversation(&mut self, id: &ConversationId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Messages and statuses
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_message(&mut self, id: &MessageId) -> Result<Option<MessageRecord>>;

    /// Upsert a message. `record.statuses` is ignored.
    async fn upsert_message(&mut self, record: &MessageRecord) -> Result<()>;

    /// Delete a message and its statuses.
    async fn delete_message(&mut self, id: &MessageId) -> Result<()>;

    async fn get_status(
        &mut self,
        message_id: &MessageId,
        profile_id: &ProfileId,
    ) -> Result<Option<MessageStatusRecord>>;

    async fn upsert_status(&mut self, status: &MessageStatusRecord) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Participants
    // ─────────────────────────────────────────────────────────────────────────

    async fn upsert_participant(&mut self, participant: &ParticipantRecord) -> Result<()>;

    async fn delete_participant(
        &mut self,
        conversation_id: &ConversationId,
        profile_id: &ProfileId,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Orphaned events
    // ─────────────────────────────────────────────────────────────────────────

    /// Upsert keyed by `(conversation_id, event_id)`.
    async fn upsert_orphaned_event(&mut self, event: &OrphanedEvent) -> Result<()>;

    /// Orphaned events whose related message is one of `message_ids`.
    async fn orphaned_events_for(&mut self, message_ids: &[MessageId])
        -> Result<Vec<OrphanedEvent>>;

    async fn delete_orphaned_event(
        &mut self,
        conversation_id: &ConversationId,
        event_id: EventId,
    ) -> Result<()>;

    /// Make all staged writes visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}
