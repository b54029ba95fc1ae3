//! The remote messaging service contract.
//!
//! The engine never speaks a wire protocol itself. Every remote call goes
//! through [`RemoteService`], and every call answers with a
//! [`RemoteResponse`] envelope that carries the outcome, the status code, an
//! optional version token, optional field-level validation failures, and an
//! optional payload.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use threadline_core::{
    ConversationId, ConversationMeta, ConversationSummary, DeliveryStatus, EventId, MessageId,
    MessagePart, MessageRecord, MessageStatusRecord, ParticipantRecord, ProfileId, RemoteEvent,
    VersionToken,
};

use crate::error::{Result, SyncError};

/// Status code the service uses to signal a version conflict.
pub const STATUS_VERSION_CONFLICT: u16 = 412;

/// A field the service rejected, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field: String,
    pub message: String,
}

impl FieldFailure {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The envelope every remote call answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub version: Option<VersionToken>,
    pub validation_failures: Vec<FieldFailure>,
    pub payload: Option<T>,
}

impl<T> RemoteResponse<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            status_code: 200,
            version: None,
            validation_failures: Vec::new(),
            payload: Some(payload),
        }
    }

    pub fn ok_versioned(payload: T, version: Option<VersionToken>) -> Self {
        Self {
            version,
            ..Self::ok(payload)
        }
    }

    pub fn failure(status_code: u16) -> Self {
        Self {
            success: false,
            status_code,
            version: None,
            validation_failures: Vec::new(),
            payload: None,
        }
    }

    /// The resource moved on; `version` is the one the server holds now.
    pub fn conflict(version: Option<VersionToken>) -> Self {
        Self {
            version,
            ..Self::failure(STATUS_VERSION_CONFLICT)
        }
    }

    pub fn invalid(failures: Vec<FieldFailure>) -> Self {
        Self {
            validation_failures: failures,
            ..Self::failure(400)
        }
    }

    pub fn is_conflict(&self) -> bool {
        !self.success && self.status_code == STATUS_VERSION_CONFLICT
    }

    /// Collapse the envelope into the payload or a typed error.
    ///
    /// `what` names the operation for the missing-payload case.
    pub fn into_result(self, what: &'static str) -> Result<T> {
        if self.success {
            return self.payload.ok_or(SyncError::MissingPayload(what));
        }
        if self.is_conflict() {
            return Err(SyncError::VersionConflict {
                version: self.version,
            });
        }
        if !self.validation_failures.is_empty() {
            return Err(SyncError::Validation(self.validation_failures));
        }
        Err(SyncError::Network {
            status_code: self.status_code,
            message: format!("{} failed", what),
        })
    }
}

/// Request body for creating a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    pub meta: ConversationMeta,
    pub participants: Vec<ProfileId>,
}

/// Request body for sending a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub conversation_id: ConversationId,
    /// The client's temporary id, echoed for correlation.
    pub client_message_id: MessageId,
    pub sender: ProfileId,
    /// Only transmittable parts.
    pub parts: Vec<MessagePart>,
}

/// What the service assigns to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub event_id: EventId,
    /// Unix ms.
    pub sent_on: i64,
}

/// Request body for uploading one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentUpload {
    pub conversation_id: ConversationId,
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Where an uploaded attachment now lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAttachment {
    pub url: String,
    pub size: u64,
}

/// The remote messaging service.
///
/// Paged queries take `from`: `Some(id)` pages forward from `id`
/// (inclusive) in ascending order; `None` returns the newest `page_size`
/// entries, newest first.
///
/// Implementations own their timeout and retry policy; the engine adds none
/// beyond its backfill ceiling and rate limiter.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn create_conversation(
        &self,
        request: NewConversation,
    ) -> RemoteResponse<ConversationSummary>;

    async fn update_conversation(
        &self,
        id: &ConversationId,
        meta: ConversationMeta,
        if_version: Option<VersionToken>,
    ) -> RemoteResponse<ConversationSummary>;

    async fn delete_conversation(
        &self,
        id: &ConversationId,
        if_version: Option<VersionToken>,
    ) -> RemoteResponse<()>;

    async fn get_conversation(&self, id: &ConversationId) -> RemoteResponse<ConversationSummary>;

    async fn list_conversations(&self) -> RemoteResponse<Vec<ConversationSummary>>;

    async fn add_participants(
        &self,
        id: &ConversationId,
        participants: Vec<ParticipantRecord>,
    ) -> RemoteResponse<Vec<ParticipantRecord>>;

    async fn remove_participants(
        &self,
        id: &ConversationId,
        profiles: Vec<ProfileId>,
    ) -> RemoteResponse<()>;

    async fn list_participants(&self, id: &ConversationId) -> RemoteResponse<Vec<ParticipantRecord>>;

    async fn send_message(&self, message: OutgoingMessage) -> RemoteResponse<SentMessage>;

    async fn query_messages(
        &self,
        id: &ConversationId,
        from: Option<EventId>,
        page_size: usize,
    ) -> RemoteResponse<Vec<MessageRecord>>;

    async fn query_events(
        &self,
        id: &ConversationId,
        from: Option<EventId>,
        page_size: usize,
    ) -> RemoteResponse<Vec<RemoteEvent>>;

    async fn update_message_status(
        &self,
        id: &ConversationId,
        message_id: &MessageId,
        profile_id: &ProfileId,
        status: DeliveryStatus,
    ) -> RemoteResponse<MessageStatusRecord>;

    async fn upload_attachment(&self, upload: AttachmentUpload)
        -> RemoteResponse<UploadedAttachment>;
}

/// An in-memory remote service for testing.
///
/// Keeps one ordered event stream per conversation with ids starting at 1.
/// Every appended event bumps the conversation's version token. Failures are
/// injected per operation.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::time::Duration;

    use threadline_core::{EventKind, SendState};
    use tokio::sync::Mutex;

    const EPOCH_MS: i64 = 1_700_000_000_000;

    #[derive(Debug)]
    struct RemoteConversation {
        summary: ConversationSummary,
        participants: BTreeMap<ProfileId, ParticipantRecord>,
        events: Vec<RemoteEvent>,
    }

    #[derive(Debug, Default)]
    struct Faults {
        event_queries: BTreeSet<ConversationId>,
        uploads: BTreeSet<String>,
        upload_delays: HashMap<String, Duration>,
        sends: bool,
        status_updates: u32,
        get_conversation: bool,
        list_conversations: bool,
        conflicts: u32,
        validation: Option<Vec<FieldFailure>>,
    }

    #[derive(Debug, Default)]
    struct Calls {
        event_queries: HashMap<ConversationId, usize>,
        get_conversation: usize,
        status_updates: usize,
        uploads: usize,
        sent: Vec<OutgoingMessage>,
    }

    #[derive(Debug, Default)]
    struct State {
        conversations: BTreeMap<ConversationId, RemoteConversation>,
        next_conversation: u64,
        next_message: u64,
        next_version: u64,
        next_upload: u64,
        clock: i64,
        faults: Faults,
        calls: Calls,
    }

    impl State {
        fn tick(&mut self) -> i64 {
            self.clock += 1;
            EPOCH_MS + self.clock
        }

        fn bump_version(&mut self) -> VersionToken {
            self.next_version += 1;
            VersionToken::new(format!("v{}", self.next_version))
        }

        fn next_event_id(&self, id: &ConversationId) -> Option<EventId> {
            let conversation = self.conversations.get(id)?;
            Some(EventId::new(conversation.events.len() as i64 + 1))
        }

        fn append(&mut self, id: &ConversationId, kind: EventKind) -> Option<RemoteEvent> {
            let version = self.bump_version();
            let now = self.tick();
            let event_id = self.next_event_id(id)?;
            let conversation = self.conversations.get_mut(id)?;
            let event = RemoteEvent::new(id.clone(), event_id, kind);
            conversation.events.push(event.clone());
            conversation.summary.latest_remote_event_id = event_id;
            conversation.summary.version = Some(version);
            conversation.summary.updated_on = now;
            Some(event)
        }

        fn touch(&mut self, id: &ConversationId) -> Option<ConversationSummary> {
            let version = self.bump_version();
            let now = self.tick();
            let conversation = self.conversations.get_mut(id)?;
            conversation.summary.version = Some(version);
            conversation.summary.updated_on = now;
            Some(conversation.summary.clone())
        }

        /// Version check shared by update and delete.
        fn check_version(
            &mut self,
            id: &ConversationId,
            if_version: &Option<VersionToken>,
        ) -> std::result::Result<(), (u16, Option<VersionToken>)> {
            let current = match self.conversations.get(id) {
                Some(c) => c.summary.version.clone(),
                None => return Err((404, None)),
            };
            if self.faults.conflicts > 0 {
                self.faults.conflicts -= 1;
                return Err((STATUS_VERSION_CONFLICT, current));
            }
            match if_version {
                Some(v) if Some(v) != current.as_ref() => Err((STATUS_VERSION_CONFLICT, current)),
                _ => Ok(()),
            }
        }
    }

    fn rejection<T>((code, version): (u16, Option<VersionToken>)) -> RemoteResponse<T> {
        if code == STATUS_VERSION_CONFLICT {
            RemoteResponse::conflict(version)
        } else {
            RemoteResponse::failure(code)
        }
    }

    /// In-memory [`RemoteService`].
    #[derive(Debug, Default)]
    pub struct MemoryRemote {
        state: Mutex<State>,
    }

    impl MemoryRemote {
        pub fn new() -> Self {
            Self::default()
        }

        // ─────────────────────────────────────────────────────────────────
        // Server-side actions (other participants acting)
        // ─────────────────────────────────────────────────────────────────

        /// Create a conversation with an empty event stream.
        pub async fn seed_conversation(&self, id: &str, name: &str) -> ConversationSummary {
            let mut state = self.state.lock().await;
            let version = state.bump_version();
            let now = state.tick();
            let summary = ConversationSummary {
                id: ConversationId::new(id),
                version: Some(version),
                latest_remote_event_id: EventId::UNKNOWN,
                updated_on: now,
                meta: ConversationMeta::named(name),
            };
            state.conversations.insert(
                summary.id.clone(),
                RemoteConversation {
                    summary: summary.clone(),
                    participants: BTreeMap::new(),
                    events: Vec::new(),
                },
            );
            summary
        }

        /// Append a text message from `sender`.
        pub async fn append_message(
            &self,
            id: &ConversationId,
            sender: &ProfileId,
            text: &str,
        ) -> Option<RemoteEvent> {
            let mut state = self.state.lock().await;
            state.next_message += 1;
            let message_id = MessageId::new(format!("msg-{}", state.next_message));
            let sent_on = state.tick();
            let message = MessageRecord {
                message_id,
                conversation_id: id.clone(),
                sent_event_id: state.next_event_id(id)?,
                sender: sender.clone(),
                sent_on,
                parts: vec![MessagePart::text(text)],
                statuses: Vec::new(),
                send_state: SendState::Sent,
            };
            state.append(id, EventKind::MessageSent(message))
        }

        /// Append a status change for `message_id`.
        pub async fn append_status(
            &self,
            id: &ConversationId,
            message_id: &MessageId,
            profile_id: &ProfileId,
            status: DeliveryStatus,
        ) -> Option<RemoteEvent> {
            let mut state = self.state.lock().await;
            let updated_on = state.tick();
            let record = MessageStatusRecord {
                conversation_id: id.clone(),
                message_id: message_id.clone(),
                profile_id: profile_id.clone(),
                status,
                event_id: EventId::UNKNOWN,
                updated_on,
            };
            state.append(id, EventKind::StatusUpdated(record))
        }

        /// Append an event of a kind clients may not understand.
        pub async fn append_unknown(&self, id: &ConversationId, kind: &str) -> Option<RemoteEvent> {
            let mut state = self.state.lock().await;
            state.append(
                id,
                EventKind::Unknown {
                    kind: kind.to_owned(),
                },
            )
        }

        /// Rename a conversation server-side, moving its version on.
        pub async fn rename_conversation(
            &self,
            id: &ConversationId,
            name: &str,
        ) -> Option<ConversationSummary> {
            let mut state = self.state.lock().await;
            state.conversations.get_mut(id)?.summary.meta.name = Some(name.to_owned());
            state.touch(id)
        }

        /// Delete a conversation server-side.
        pub async fn drop_conversation(&self, id: &ConversationId) {
            self.state.lock().await.conversations.remove(id);
        }

        pub async fn summary(&self, id: &ConversationId) -> Option<ConversationSummary> {
            let state = self.state.lock().await;
            state.conversations.get(id).map(|c| c.summary.clone())
        }

        pub async fn events(&self, id: &ConversationId) -> Vec<RemoteEvent> {
            let state = self.state.lock().await;
            state
                .conversations
                .get(id)
                .map(|c| c.events.clone())
                .unwrap_or_default()
        }

        // ─────────────────────────────────────────────────────────────────
        // Fault injection
        // ─────────────────────────────────────────────────────────────────

        pub async fn fail_event_queries(&self, id: &ConversationId, fail: bool) {
            let mut state = self.state.lock().await;
            if fail {
                state.faults.event_queries.insert(id.clone());
            } else {
                state.faults.event_queries.remove(id);
            }
        }

        /// Fail uploads of attachments called `name`.
        pub async fn fail_upload(&self, name: &str) {
            self.state.lock().await.faults.uploads.insert(name.to_owned());
        }

        /// Delay uploads of attachments called `name`.
        pub async fn delay_upload(&self, name: &str, delay: Duration) {
            self.state
                .lock()
                .await
                .faults
                .upload_delays
                .insert(name.to_owned(), delay);
        }

        pub async fn fail_sends(&self, fail: bool) {
            self.state.lock().await.faults.sends = fail;
        }

        /// Fail the next `times` status updates with a network error.
        pub async fn fail_status_updates(&self, times: u32) {
            self.state.lock().await.faults.status_updates = times;
        }

        pub async fn fail_get_conversation(&self, fail: bool) {
            self.state.lock().await.faults.get_conversation = fail;
        }

        pub async fn fail_list_conversations(&self, fail: bool) {
            self.state.lock().await.faults.list_conversations = fail;
        }

        /// Answer the next `times` updates or deletes with a conflict.
        pub async fn force_conflicts(&self, times: u32) {
            self.state.lock().await.faults.conflicts = times;
        }

        /// Reject the next mutation with these field failures.
        pub async fn reject_next(&self, failures: Vec<FieldFailure>) {
            self.state.lock().await.faults.validation = Some(failures);
        }

        // ─────────────────────────────────────────────────────────────────
        // Call accounting
        // ─────────────────────────────────────────────────────────────────

        pub async fn event_query_count(&self, id: &ConversationId) -> usize {
            let state = self.state.lock().await;
            state.calls.event_queries.get(id).copied().unwrap_or(0)
        }

        pub async fn get_conversation_count(&self) -> usize {
            self.state.lock().await.calls.get_conversation
        }

        pub async fn status_update_count(&self) -> usize {
            self.state.lock().await.calls.status_updates
        }

        pub async fn upload_count(&self) -> usize {
            self.state.lock().await.calls.uploads
        }

        /// Every message body the service accepted, in order.
        pub async fn sent_messages(&self) -> Vec<OutgoingMessage> {
            self.state.lock().await.calls.sent.clone()
        }
    }

    #[async_trait]
    impl RemoteService for MemoryRemote {
        async fn create_conversation(
            &self,
            request: NewConversation,
        ) -> RemoteResponse<ConversationSummary> {
            let mut state = self.state.lock().await;
            if let Some(failures) = state.faults.validation.take() {
                return RemoteResponse::invalid(failures);
            }
            state.next_conversation += 1;
            let id = ConversationId::new(format!("conv-{}", state.next_conversation));
            let version = state.bump_version();
            let now = state.tick();
            let summary = ConversationSummary {
                id: id.clone(),
                version: Some(version.clone()),
                latest_remote_event_id: EventId::UNKNOWN,
                updated_on: now,
                meta: request.meta,
            };
            let participants = request
                .participants
                .into_iter()
                .map(|p| (p.clone(), ParticipantRecord::new(id.clone(), p, "member")))
                .collect();
            state.conversations.insert(
                id,
                RemoteConversation {
                    summary: summary.clone(),
                    participants,
                    events: Vec::new(),
                },
            );
            RemoteResponse::ok_versioned(summary, Some(version))
        }

        async fn update_conversation(
            &self,
            id: &ConversationId,
            meta: ConversationMeta,
            if_version: Option<VersionToken>,
        ) -> RemoteResponse<ConversationSummary> {
            let mut state = self.state.lock().await;
            if let Some(failures) = state.faults.validation.take() {
                return RemoteResponse::invalid(failures);
            }
            if meta.name.as_deref() == Some("") {
                return RemoteResponse::invalid(vec![FieldFailure::new("name", "must not be empty")]);
            }
            if let Err(rejected) = state.check_version(id, &if_version) {
                return rejection(rejected);
            }
            if let Some(conversation) = state.conversations.get_mut(id) {
                conversation.summary.meta = meta;
            }
            match state.touch(id) {
                Some(summary) => {
                    let version = summary.version.clone();
                    RemoteResponse::ok_versioned(summary, version)
                }
                None => RemoteResponse::failure(404),
            }
        }

        async fn delete_conversation(
            &self,
            id: &ConversationId,
            if_version: Option<VersionToken>,
        ) -> RemoteResponse<()> {
            let mut state = self.state.lock().await;
            if let Err(rejected) = state.check_version(id, &if_version) {
                return rejection(rejected);
            }
            state.conversations.remove(id);
            RemoteResponse::ok(())
        }

        async fn get_conversation(&self, id: &ConversationId) -> RemoteResponse<ConversationSummary> {
            let mut state = self.state.lock().await;
            state.calls.get_conversation += 1;
            if state.faults.get_conversation {
                return RemoteResponse::failure(503);
            }
            match state.conversations.get(id) {
                Some(c) => {
                    let version = c.summary.version.clone();
                    RemoteResponse::ok_versioned(c.summary.clone(), version)
                }
                None => RemoteResponse::failure(404),
            }
        }

        async fn list_conversations(&self) -> RemoteResponse<Vec<ConversationSummary>> {
            let state = self.state.lock().await;
            if state.faults.list_conversations {
                return RemoteResponse::failure(503);
            }
            RemoteResponse::ok(
                state
                    .conversations
                    .values()
                    .map(|c| c.summary.clone())
                    .collect(),
            )
        }

        async fn add_participants(
            &self,
            id: &ConversationId,
            participants: Vec<ParticipantRecord>,
        ) -> RemoteResponse<Vec<ParticipantRecord>> {
            let mut state = self.state.lock().await;
            if let Some(failures) = state.faults.validation.take() {
                return RemoteResponse::invalid(failures);
            }
            let Some(conversation) = state.conversations.get_mut(id) else {
                return RemoteResponse::failure(404);
            };
            let added: Vec<ParticipantRecord> = participants
                .into_iter()
                .map(|p| ParticipantRecord {
                    conversation_id: id.clone(),
                    ..p
                })
                .collect();
            for p in &added {
                conversation.participants.insert(p.profile_id.clone(), p.clone());
            }
            state.append(id, EventKind::ParticipantsAdded(added.clone()));
            RemoteResponse::ok(added)
        }

        async fn remove_participants(
            &self,
            id: &ConversationId,
            profiles: Vec<ProfileId>,
        ) -> RemoteResponse<()> {
            let mut state = self.state.lock().await;
            let Some(conversation) = state.conversations.get_mut(id) else {
                return RemoteResponse::failure(404);
            };
            for p in &profiles {
                conversation.participants.remove(p);
            }
            state.append(id, EventKind::ParticipantsRemoved(profiles));
            RemoteResponse::ok(())
        }

        async fn list_participants(
            &self,
            id: &ConversationId,
        ) -> RemoteResponse<Vec<ParticipantRecord>> {
            let state = self.state.lock().await;
            match state.conversations.get(id) {
                Some(c) => RemoteResponse::ok(c.participants.values().cloned().collect()),
                None => RemoteResponse::failure(404),
            }
        }

        async fn send_message(&self, message: OutgoingMessage) -> RemoteResponse<SentMessage> {
            let mut state = self.state.lock().await;
            if state.faults.sends {
                return RemoteResponse::failure(503);
            }
            let Some(event_id) = state.next_event_id(&message.conversation_id) else {
                return RemoteResponse::failure(404);
            };
            state.next_message += 1;
            let message_id = MessageId::new(format!("msg-{}", state.next_message));
            let sent_on = state.tick();
            let record = MessageRecord {
                message_id: message_id.clone(),
                conversation_id: message.conversation_id.clone(),
                sent_event_id: event_id,
                sender: message.sender.clone(),
                sent_on,
                parts: message.parts.clone(),
                statuses: Vec::new(),
                send_state: SendState::Sent,
            };
            let Some(event) = state.append(&message.conversation_id, EventKind::MessageSent(record))
            else {
                return RemoteResponse::failure(404);
            };
            state.calls.sent.push(message);
            RemoteResponse::ok(SentMessage {
                message_id,
                event_id: event.event_id,
                sent_on,
            })
        }

        async fn query_messages(
            &self,
            id: &ConversationId,
            from: Option<EventId>,
            page_size: usize,
        ) -> RemoteResponse<Vec<MessageRecord>> {
            let events = self.query_events(id, from, page_size).await;
            if !events.success {
                return RemoteResponse::failure(events.status_code);
            }
            let messages = events
                .payload
                .unwrap_or_default()
                .into_iter()
                .filter_map(|e| match e.kind {
                    EventKind::MessageSent(m) => Some(m),
                    _ => None,
                })
                .collect();
            RemoteResponse::ok(messages)
        }

        async fn query_events(
            &self,
            id: &ConversationId,
            from: Option<EventId>,
            page_size: usize,
        ) -> RemoteResponse<Vec<RemoteEvent>> {
            let mut state = self.state.lock().await;
            *state.calls.event_queries.entry(id.clone()).or_default() += 1;
            if state.faults.event_queries.contains(id) {
                return RemoteResponse::failure(503);
            }
            let Some(conversation) = state.conversations.get(id) else {
                return RemoteResponse::failure(404);
            };
            let page = match from {
                Some(from) => conversation
                    .events
                    .iter()
                    .filter(|e| e.event_id >= from)
                    .take(page_size)
                    .cloned()
                    .collect(),
                None => conversation
                    .events
                    .iter()
                    .rev()
                    .take(page_size)
                    .cloned()
                    .collect(),
            };
            RemoteResponse::ok(page)
        }

        async fn update_message_status(
            &self,
            id: &ConversationId,
            message_id: &MessageId,
            profile_id: &ProfileId,
            status: DeliveryStatus,
        ) -> RemoteResponse<MessageStatusRecord> {
            let mut state = self.state.lock().await;
            state.calls.status_updates += 1;
            if state.faults.status_updates > 0 {
                state.faults.status_updates -= 1;
                return RemoteResponse::failure(503);
            }
            if let Some(failures) = state.faults.validation.take() {
                return RemoteResponse::invalid(failures);
            }
            let updated_on = state.tick();
            let mut record = MessageStatusRecord {
                conversation_id: id.clone(),
                message_id: message_id.clone(),
                profile_id: profile_id.clone(),
                status,
                event_id: EventId::UNKNOWN,
                updated_on,
            };
            match state.append(id, EventKind::StatusUpdated(record.clone())) {
                Some(event) => {
                    record.event_id = event.event_id;
                    RemoteResponse::ok(record)
                }
                None => RemoteResponse::failure(404),
            }
        }

        async fn upload_attachment(
            &self,
            upload: AttachmentUpload,
        ) -> RemoteResponse<UploadedAttachment> {
            let delay = {
                let mut state = self.state.lock().await;
                state.calls.uploads += 1;
                state.faults.upload_delays.get(&upload.name).copied()
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state.lock().await;
            if state.faults.uploads.contains(&upload.name) {
                return RemoteResponse::failure(500);
            }
            state.next_upload += 1;
            RemoteResponse::ok(UploadedAttachment {
                url: format!(
                    "memory://{}/attachments/{}/{}",
                    upload.conversation_id, state.next_upload, upload.name
                ),
                size: upload.data.len() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRemote;
    use super::*;

    #[test]
    fn test_into_result_maps_taxonomy() {
        let ok: RemoteResponse<u32> = RemoteResponse::ok(7);
        assert_eq!(ok.into_result("op").unwrap(), 7);

        let conflict: RemoteResponse<u32> = RemoteResponse::conflict(Some(VersionToken::new("v9")));
        assert!(matches!(
            conflict.into_result("op"),
            Err(SyncError::VersionConflict { version: Some(v) }) if v.as_str() == "v9"
        ));

        let invalid: RemoteResponse<u32> =
            RemoteResponse::invalid(vec![FieldFailure::new("name", "too long")]);
        assert!(matches!(invalid.into_result("op"), Err(SyncError::Validation(f)) if f.len() == 1));

        let down: RemoteResponse<u32> = RemoteResponse::failure(503);
        assert!(matches!(
            down.into_result("op"),
            Err(SyncError::Network { status_code: 503, .. })
        ));

        let empty: RemoteResponse<u32> = RemoteResponse {
            payload: None,
            ..RemoteResponse::ok(0)
        };
        assert!(matches!(empty.into_result("op"), Err(SyncError::MissingPayload("op"))));
    }

    #[tokio::test]
    async fn test_memory_event_ids_start_at_one() {
        let remote = MemoryRemote::new();
        let summary = remote.seed_conversation("c1", "General").await;
        let alice = ProfileId::new("alice");

        let first = remote.append_message(&summary.id, &alice, "hi").await.unwrap();
        let second = remote.append_message(&summary.id, &alice, "there").await.unwrap();
        assert_eq!(first.event_id, EventId::new(1));
        assert_eq!(second.event_id, EventId::new(2));

        let after = remote.summary(&summary.id).await.unwrap();
        assert_eq!(after.latest_remote_event_id, EventId::new(2));
        assert_ne!(after.version, summary.version);
    }

    #[tokio::test]
    async fn test_memory_query_paging() {
        let remote = MemoryRemote::new();
        let id = remote.seed_conversation("c1", "General").await.id;
        let alice = ProfileId::new("alice");
        for i in 0..5 {
            remote.append_message(&id, &alice, &format!("m{}", i)).await;
        }

        let page = remote
            .query_events(&id, Some(EventId::new(2)), 2)
            .await
            .into_result("query")
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|e| e.event_id.get()).collect();
        assert_eq!(ids, vec![2, 3]);

        let latest = remote
            .query_events(&id, None, 1)
            .await
            .into_result("query")
            .unwrap();
        assert_eq!(latest[0].event_id, EventId::new(5));
        assert_eq!(remote.event_query_count(&id).await, 2);
    }

    #[tokio::test]
    async fn test_memory_update_checks_version() {
        let remote = MemoryRemote::new();
        let summary = remote.seed_conversation("c1", "General").await;

        let stale = Some(VersionToken::new("v0"));
        let response = remote
            .update_conversation(&summary.id, ConversationMeta::named("Renamed"), stale)
            .await;
        assert!(response.is_conflict());
        assert_eq!(response.version, summary.version);

        let response = remote
            .update_conversation(
                &summary.id,
                ConversationMeta::named("Renamed"),
                summary.version.clone(),
            )
            .await;
        assert!(response.success);
        assert_ne!(response.version, summary.version);
    }

    #[tokio::test]
    async fn test_memory_upload_failure_by_name() {
        let remote = MemoryRemote::new();
        let id = remote.seed_conversation("c1", "General").await.id;
        remote.fail_upload("broken.png").await;

        let upload = |name: &str| AttachmentUpload {
            conversation_id: id.clone(),
            name: name.to_owned(),
            content_type: "image/png".into(),
            data: Bytes::from_static(b"\x89PNG"),
        };
        assert!(!remote.upload_attachment(upload("broken.png")).await.success);
        let ok = remote
            .upload_attachment(upload("fine.png"))
            .await
            .into_result("upload")
            .unwrap();
        assert_eq!(ok.size, 4);
        assert_eq!(remote.upload_count().await, 2);
    }
}
