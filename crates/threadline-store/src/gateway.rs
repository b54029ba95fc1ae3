//! The persistence gateway: the single choke-point for local mutations.
//!
//! Every method runs as one transaction, and transactions are serialized by
//! an internal mutex. All writes are idempotent upserts with monotonic
//! comparisons, so replaying the same input leaves the store unchanged apart
//! from re-confirming high-water marks.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use threadline_core::{
    merge_conversation, ConversationId, ConversationRecord, EventId, EventKind, MessageId,
    MessagePart, MessageRecord, MessageStatusRecord, OrphanedEvent, ParticipantRecord, ProfileId,
    Reconciliation, RemoteEvent, SendState,
};

use crate::error::{Result, StoreError};
use crate::traits::{LocalStore, StoreTransaction};

/// Outcome of applying a [`Reconciliation`].
///
/// Each of the three sets is written in its own transaction.
#[derive(Debug, Default)]
pub struct ReconcileApplied {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub add_ok: bool,
    pub update_ok: bool,
    pub delete_ok: bool,
    pub failures: Vec<StoreError>,
}

impl ReconcileApplied {
    /// All three sets were written.
    pub fn is_success(&self) -> bool {
        self.add_ok && self.update_ok && self.delete_ok
    }
}

/// What one applied page of events changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageApplied {
    pub messages: usize,
    pub statuses: usize,
    /// Statuses parked because their message is not known yet.
    pub orphaned: usize,
    /// Parked statuses applied now that their message arrived.
    pub orphans_consumed: usize,
    pub participants: usize,
    /// Events of kinds this client does not understand.
    pub skipped: usize,
    /// Highest event id in the page.
    pub last_event_id: EventId,
}

/// Serialized, transactional access to a [`LocalStore`].
pub struct PersistenceGateway<S: LocalStore> {
    store: Arc<S>,
    lock: Mutex<()>,
}

impl<S: LocalStore> PersistenceGateway<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn begin(&self) -> Result<(MutexGuard<'_, ()>, Box<dyn StoreTransaction>)> {
        let guard = self.lock.lock().await;
        let tx = self.store.begin().await?;
        Ok((guard, tx))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply the three sets of a reconciliation, each in its own transaction.
    pub async fn apply_reconciliation(&self, reconciliation: &Reconciliation) -> ReconcileApplied {
        let mut applied = ReconcileApplied::default();

        match self.upsert_conversations(&reconciliation.to_add).await {
            Ok(n) => {
                applied.added = n;
                applied.add_ok = true;
            }
            Err(e) => applied.failures.push(e),
        }
        match self.upsert_conversations(&reconciliation.to_update).await {
            Ok(n) => {
                applied.updated = n;
                applied.update_ok = true;
            }
            Err(e) => applied.failures.push(e),
        }
        match self.delete_conversations(&reconciliation.to_delete).await {
            Ok(n) => {
                applied.deleted = n;
                applied.delete_ok = true;
            }
            Err(e) => applied.failures.push(e),
        }

        if !applied.is_success() {
            warn!(failures = applied.failures.len(), "reconciliation partially applied");
        }
        applied
    }

    /// Merge-upsert a batch of conversations in one transaction.
    ///
    /// Returns how many records were written.
    pub async fn upsert_conversations(&self, records: &[ConversationRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let (_guard, mut tx) = self.begin().await?;
        let mut written = 0;
        for record in records {
            let existing = tx.get_conversation(&record.id).await?;
            if let Some(merged) = merge_conversation(existing.as_ref(), record) {
                tx.upsert_conversation(&merged).await?;
                written += 1;
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Merge-upsert one conversation and return the stored result.
    pub async fn merge_conversation(&self, record: &ConversationRecord) -> Result<ConversationRecord> {
        let (_guard, mut tx) = self.begin().await?;
        let existing = tx.get_conversation(&record.id).await?;
        let stored = match merge_conversation(existing.as_ref(), record) {
            Some(merged) => {
                tx.upsert_conversation(&merged).await?;
                merged
            }
            None => {
                debug!(conversation = %record.id, "ignoring stale conversation update");
                existing.unwrap_or_else(|| record.clone())
            }
        };
        tx.commit().await?;
        Ok(stored)
    }

    /// Delete conversations and everything hanging off them.
    pub async fn delete_conversations(&self, ids: &[ConversationId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (_guard, mut tx) = self.begin().await?;
        for id in ids {
            tx.delete_conversation(id).await?;
        }
        tx.commit().await?;
        Ok(ids.len())
    }

    /// Mark an exhausted backfill; see [`ConversationRecord::mark_backfilled`].
    pub async fn mark_backfilled(&self, id: &ConversationId) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        let mut record = tx
            .get_conversation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", id)))?;
        if record.is_initialized() {
            return Ok(());
        }
        record.mark_backfilled();
        tx.upsert_conversation(&record).await?;
        tx.commit().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one page of a conversation's event stream atomically.
    ///
    /// Messages are written first; statuses for messages that are neither
    /// stored nor in the page are parked as orphaned events; parked events
    /// for the page's messages are then applied and deleted. The
    /// conversation's event bounds advance over every event in the page,
    /// including kinds this client skips, but only when the page starts at
    /// or below `last_local_event_id + 1`. A detached page only raises the
    /// remote mark.
    pub async fn apply_events(
        &self,
        conversation_id: &ConversationId,
        events: &[RemoteEvent],
    ) -> Result<PageApplied> {
        let mut applied = PageApplied {
            last_event_id: EventId::UNKNOWN,
            ..PageApplied::default()
        };
        if events.is_empty() {
            return Ok(applied);
        }

        let (_guard, mut tx) = self.begin().await?;
        let mut conversation = tx
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))?;

        let page_messages: BTreeSet<MessageId> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::MessageSent(m) => Some(m.message_id.clone()),
                _ => None,
            })
            .collect();

        for event in events {
            if let EventKind::MessageSent(message) = &event.kind {
                let mut record = message.clone();
                record.conversation_id = conversation_id.clone();
                record.sent_event_id = event.event_id;
                record.send_state = SendState::Sent;
                tx.upsert_message(&record).await?;
                applied.messages += 1;
            }
        }

        for event in events {
            match &event.kind {
                EventKind::MessageSent(_) => {}
                EventKind::StatusUpdated(status) => {
                    let mut status = status.clone();
                    status.conversation_id = conversation_id.clone();
                    status.event_id = event.event_id;
                    let known = page_messages.contains(&status.message_id)
                        || tx.get_message(&status.message_id).await?.is_some();
                    if known {
                        if upsert_status_upgrade(tx.as_mut(), &status).await? {
                            applied.statuses += 1;
                        }
                    } else {
                        tx.upsert_orphaned_event(&OrphanedEvent::from_status(&status)?)
                            .await?;
                        applied.orphaned += 1;
                    }
                }
                EventKind::ParticipantsAdded(participants) => {
                    for participant in participants {
                        tx.upsert_participant(participant).await?;
                        applied.participants += 1;
                    }
                }
                EventKind::ParticipantsRemoved(profiles) => {
                    for profile in profiles {
                        tx.delete_participant(conversation_id, profile).await?;
                        applied.participants += 1;
                    }
                }
                EventKind::Unknown { kind } => {
                    debug!(conversation = %conversation_id, event_id = %event.event_id, kind = %kind, "skipping unknown event kind");
                    applied.skipped += 1;
                }
            }
        }

        let ids: Vec<MessageId> = page_messages.into_iter().collect();
        applied.orphans_consumed = consume_orphans(tx.as_mut(), &ids).await?;

        let first = events.iter().map(|e| e.event_id).min().unwrap_or(EventId::UNKNOWN);
        let last = events.iter().map(|e| e.event_id).max().unwrap_or(EventId::UNKNOWN);
        let held = conversation.last_local_event_id;
        if !held.is_known() || first <= held.next() {
            conversation.record_local_events(first, last);
        } else {
            // Detached page: the hole below it is left for a backfill.
            debug!(
                conversation = %conversation_id,
                %held,
                %first,
                "page not contiguous with local events"
            );
            conversation.observe_remote_event(last);
        }
        tx.upsert_conversation(&conversation).await?;
        tx.commit().await?;

        applied.last_event_id = last;
        debug!(
            conversation = %conversation_id,
            last_event_id = %last,
            messages = applied.messages,
            statuses = applied.statuses,
            orphaned = applied.orphaned,
            orphans_consumed = applied.orphans_consumed,
            "applied event page"
        );
        Ok(applied)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Store the optimistic placeholder of an in-flight send.
    pub async fn insert_pending_message(&self, placeholder: &MessageRecord) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        tx.upsert_message(placeholder).await?;
        tx.commit().await
    }

    /// Replace the parts shown on a placeholder.
    pub async fn update_pending_parts(
        &self,
        temp_id: &MessageId,
        parts: Vec<MessagePart>,
    ) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        let mut placeholder = tx
            .get_message(temp_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {}", temp_id)))?;
        placeholder.parts = parts;
        tx.upsert_message(&placeholder).await?;
        tx.commit().await
    }

    /// Swap the placeholder for the server-confirmed record.
    ///
    /// The conversation's remote high-water mark is raised to the message's
    /// event id. The local mark only follows when the event is contiguous
    /// with it, so a backfill still picks up anything in between.
    pub async fn promote_message(&self, temp_id: &MessageId, confirmed: &MessageRecord) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        tx.delete_message(temp_id).await?;
        tx.upsert_message(confirmed).await?;
        consume_orphans(tx.as_mut(), std::slice::from_ref(&confirmed.message_id)).await?;

        if let Some(mut conversation) = tx.get_conversation(&confirmed.conversation_id).await? {
            let event_id = confirmed.sent_event_id;
            if conversation.last_local_event_id.is_known()
                && event_id == conversation.last_local_event_id.next()
            {
                conversation.record_local_events(event_id, event_id);
            }
            conversation.observe_remote_event(event_id);
            tx.upsert_conversation(&conversation).await?;
        }
        tx.commit().await
    }

    /// Mark a placeholder as failed. The record is kept.
    pub async fn mark_message_errored(&self, temp_id: &MessageId, reason: &str) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        let mut placeholder = tx
            .get_message(temp_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {}", temp_id)))?;
        placeholder.send_state = SendState::Errored {
            reason: reason.to_owned(),
        };
        tx.upsert_message(&placeholder).await?;
        tx.commit().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statuses and participants
    // ─────────────────────────────────────────────────────────────────────────

    /// Upgrade-only status writes. Unknown messages park the status.
    ///
    /// Returns how many statuses moved forward.
    pub async fn apply_statuses(&self, statuses: &[MessageStatusRecord]) -> Result<usize> {
        let (_guard, mut tx) = self.begin().await?;
        let mut upgraded = 0;
        for status in statuses {
            if tx.get_message(&status.message_id).await?.is_some() {
                if upsert_status_upgrade(tx.as_mut(), status).await? {
                    upgraded += 1;
                }
            } else {
                tx.upsert_orphaned_event(&OrphanedEvent::from_status(status)?)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(upgraded)
    }

    pub async fn upsert_participants(&self, participants: &[ParticipantRecord]) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        for participant in participants {
            tx.upsert_participant(participant).await?;
        }
        tx.commit().await
    }

    pub async fn remove_participants(
        &self,
        conversation_id: &ConversationId,
        profiles: &[ProfileId],
    ) -> Result<()> {
        let (_guard, mut tx) = self.begin().await?;
        for profile in profiles {
            tx.delete_participant(conversation_id, profile).await?;
        }
        tx.commit().await
    }
}

/// Write `status` if it moves the stored status forward.
async fn upsert_status_upgrade(
    tx: &mut dyn StoreTransaction,
    status: &MessageStatusRecord,
) -> Result<bool> {
    let existing = tx.get_status(&status.message_id, &status.profile_id).await?;
    if !status.supersedes(existing.as_ref()) {
        return Ok(false);
    }
    tx.upsert_status(status).await?;
    Ok(true)
}

/// Apply and delete parked statuses for messages that are now known.
async fn consume_orphans(tx: &mut dyn StoreTransaction, message_ids: &[MessageId]) -> Result<usize> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let orphans = tx.orphaned_events_for(message_ids).await?;
    let mut consumed = 0;
    for orphan in orphans {
        let status = orphan.decode_status()?;
        upsert_status_upgrade(tx, &status).await?;
        tx.delete_orphaned_event(&orphan.conversation_id, orphan.event_id)
            .await?;
        consumed += 1;
    }
    Ok(consumed)
}
