//! In-memory implementation of the store contract.
//!
//! This is primarily for testing and for embedders that do not persist
//! anything. A transaction stages a full copy of the tables and swaps it in
//! on commit, which gives read-your-own-writes and discard-on-drop for free.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use threadline_core::{
    ConversationId, ConversationRecord, EventId, MessageId, MessageRecord, MessageStatusRecord,
    OrphanedEvent, ParticipantRecord, ProfileId,
};

use crate::error::{Result, StoreError};
use crate::traits::{LocalStore, StoreTransaction};

/// A copy of every table, comparable for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub conversations: BTreeMap<ConversationId, ConversationRecord>,
    pub messages: BTreeMap<MessageId, MessageRecord>,
    pub statuses: BTreeMap<(MessageId, ProfileId), MessageStatusRecord>,
    pub participants: BTreeMap<(ConversationId, ProfileId), ParticipantRecord>,
    pub orphans: BTreeMap<(ConversationId, EventId), OrphanedEvent>,
}

impl StoreSnapshot {
    fn hydrate(&self, message: &MessageRecord) -> MessageRecord {
        let mut hydrated = message.clone();
        hydrated.statuses = self.statuses_of(&message.message_id);
        hydrated
    }

    fn statuses_of(&self, message_id: &MessageId) -> Vec<MessageStatusRecord> {
        self.statuses
            .values()
            .filter(|s| &s.message_id == message_id)
            .cloned()
            .collect()
    }
}

struct Shared {
    tables: RwLock<StoreSnapshot>,
    fail_commits: AtomicBool,
    commits: AtomicU64,
}

impl Shared {
    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreSnapshot>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(StoreSnapshot::default()),
                fail_commits: AtomicBool::new(false),
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Make every subsequent commit fail (or succeed again).
    pub fn set_fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Copy the committed tables.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.shared.read()?.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let staged = self.shared.read()?.clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged,
        }))
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        Ok(self.shared.read()?.conversations.get(id).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationRecord>> {
        Ok(self.shared.read()?.conversations.values().cloned().collect())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<MessageRecord>> {
        let tables = self.shared.read()?;
        Ok(tables.messages.get(id).map(|m| tables.hydrate(m)))
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRecord>> {
        let tables = self.shared.read()?;
        let mut messages: Vec<MessageRecord> = tables
            .messages
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .map(|m| tables.hydrate(m))
            .collect();
        messages.sort_by_key(|m| (!m.sent_event_id.is_known(), m.sent_event_id, m.sent_on));
        Ok(messages)
    }

    async fn list_statuses(&self, message_id: &MessageId) -> Result<Vec<MessageStatusRecord>> {
        Ok(self.shared.read()?.statuses_of(message_id))
    }

    async fn list_participants(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ParticipantRecord>> {
        Ok(self
            .shared
            .read()?
            .participants
            .values()
            .filter(|p| &p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn list_orphaned_events(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<OrphanedEvent>> {
        Ok(self
            .shared
            .read()?
            .orphans
            .values()
            .filter(|o| &o.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

/// A staged copy of the tables.
struct MemoryTransaction {
    shared: Arc<Shared>,
    staged: StoreSnapshot,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_conversation(&mut self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        Ok(self.staged.conversations.get(id).cloned())
    }

    async fn upsert_conversation(&mut self, record: &ConversationRecord) -> Result<()> {
        self.staged
            .conversations
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_conversation(&mut self, id: &ConversationId) -> Result<()> {
        let staged = &mut self.staged;
        staged.conversations.remove(id);
        staged.messages.retain(|_, m| &m.conversation_id != id);
        staged.statuses.retain(|_, s| &s.conversation_id != id);
        staged.participants.retain(|(cid, _), _| cid != id);
        staged.orphans.retain(|(cid, _), _| cid != id);
        Ok(())
    }

    async fn get_message(&mut self, id: &MessageId) -> Result<Option<MessageRecord>> {
        Ok(self.staged.messages.get(id).map(|m| self.staged.hydrate(m)))
    }

    async fn upsert_message(&mut self, record: &MessageRecord) -> Result<()> {
        let mut stored = record.clone();
        stored.statuses.clear();
        self.staged.messages.insert(stored.message_id.clone(), stored);
        Ok(())
    }

    async fn delete_message(&mut self, id: &MessageId) -> Result<()> {
        self.staged.messages.remove(id);
        self.staged.statuses.retain(|(mid, _), _| mid != id);
        Ok(())
    }

    async fn get_status(
        &mut self,
        message_id: &MessageId,
        profile_id: &ProfileId,
    ) -> Result<Option<MessageStatusRecord>> {
        Ok(self
            .staged
            .statuses
            .get(&(message_id.clone(), profile_id.clone()))
            .cloned())
    }

    async fn upsert_status(&mut self, status: &MessageStatusRecord) -> Result<()> {
        self.staged.statuses.insert(
            (status.message_id.clone(), status.profile_id.clone()),
            status.clone(),
        );
        Ok(())
    }

    async fn upsert_participant(&mut self, participant: &ParticipantRecord) -> Result<()> {
        self.staged.participants.insert(
            (
                participant.conversation_id.clone(),
                participant.profile_id.clone(),
            ),
            participant.clone(),
        );
        Ok(())
    }

    async fn delete_participant(
        &mut self,
        conversation_id: &ConversationId,
        profile_id: &ProfileId,
    ) -> Result<()> {
        self.staged
            .participants
            .remove(&(conversation_id.clone(), profile_id.clone()));
        Ok(())
    }

    async fn upsert_orphaned_event(&mut self, event: &OrphanedEvent) -> Result<()> {
        self.staged.orphans.insert(
            (event.conversation_id.clone(), event.event_id),
            event.clone(),
        );
        Ok(())
    }

    async fn orphaned_events_for(
        &mut self,
        message_ids: &[MessageId],
    ) -> Result<Vec<OrphanedEvent>> {
        Ok(self
            .staged
            .orphans
            .values()
            .filter(|o| message_ids.contains(&o.related_message_id))
            .cloned()
            .collect())
    }

    async fn delete_orphaned_event(
        &mut self,
        conversation_id: &ConversationId,
        event_id: EventId,
    ) -> Result<()> {
        self.staged
            .orphans
            .remove(&(conversation_id.clone(), event_id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { shared, staged } = *self;
        if shared.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::CommitFailed("commits disabled".into()));
        }
        let mut tables = shared
            .tables
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        *tables = staged;
        drop(tables);
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::{
        ConversationMeta, ConversationSummary, DeliveryStatus, MessagePart, SendState,
    };

    fn conversation(id: &str) -> ConversationRecord {
        ConversationRecord::from_summary(&ConversationSummary {
            id: ConversationId::new(id),
            version: None,
            latest_remote_event_id: EventId::UNKNOWN,
            updated_on: 0,
            meta: ConversationMeta::default(),
        })
    }

    fn message(id: &str, conversation: &str, event_id: i64) -> MessageRecord {
        MessageRecord {
            message_id: MessageId::new(id),
            conversation_id: ConversationId::new(conversation),
            sent_event_id: EventId::new(event_id),
            sender: ProfileId::new("alice"),
            sent_on: event_id,
            parts: vec![MessagePart::text("hi")],
            statuses: Vec::new(),
            send_state: SendState::Sent,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_conversation(&conversation("c1")).await.unwrap();

        // Read-your-own-write inside the transaction, invisible outside.
        assert!(tx.get_conversation(&ConversationId::new("c1")).await.unwrap().is_some());
        assert!(store.get_conversation(&ConversationId::new("c1")).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.get_conversation(&ConversationId::new("c1")).await.unwrap().is_some());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.upsert_conversation(&conversation("c1")).await.unwrap();
        }
        assert!(store.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_old_state() {
        let store = MemoryStore::new();
        store.set_fail_commits(true);
        let mut tx = store.begin().await.unwrap();
        tx.upsert_conversation(&conversation("c1")).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::CommitFailed(_))));
        assert!(store.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_conversation_cascades() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_conversation(&conversation("c1")).await.unwrap();
        tx.upsert_conversation(&conversation("c2")).await.unwrap();
        tx.upsert_message(&message("m1", "c1", 1)).await.unwrap();
        tx.upsert_message(&message("m2", "c2", 1)).await.unwrap();
        tx.upsert_participant(&ParticipantRecord::new(
            ConversationId::new("c1"),
            ProfileId::new("bob"),
            "member",
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_conversation(&ConversationId::new("c1")).await.unwrap();
        tx.commit().await.unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.participants.is_empty());
    }

    #[tokio::test]
    async fn test_messages_hydrated_and_ordered() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut pending = message("tmp-1", "c1", -1);
        pending.send_state = SendState::Pending;
        tx.upsert_message(&pending).await.unwrap();
        tx.upsert_message(&message("m2", "c1", 2)).await.unwrap();
        tx.upsert_message(&message("m1", "c1", 1)).await.unwrap();
        tx.upsert_status(&MessageStatusRecord {
            conversation_id: ConversationId::new("c1"),
            message_id: MessageId::new("m1"),
            profile_id: ProfileId::new("bob"),
            status: DeliveryStatus::Read,
            event_id: EventId::new(3),
            updated_on: 3,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let messages = store.list_messages(&ConversationId::new("c1")).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "tmp-1"]);
        assert_eq!(messages[0].statuses.len(), 1);
        assert_eq!(messages[0].statuses[0].status, DeliveryStatus::Read);
    }
}
