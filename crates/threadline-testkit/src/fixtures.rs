//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use threadline::{EngineConfig, Session, SyncOrchestrator};
use threadline_core::{
    ConversationId, ConversationMeta, ConversationRecord, ConversationSummary, DeliveryStatus,
    EventId, EventKind, MessageId, MessagePart, MessageRecord, MessageStatusRecord, ProfileId,
    RemoteEvent, SendState, VersionToken,
};
use threadline_store::MemoryStore;
use threadline_sync::MemoryRemote;

/// Install a tracing subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// An engine wired to an in-memory store and remote.
pub struct TestHarness {
    pub remote: Arc<MemoryRemote>,
    pub store: Arc<MemoryStore>,
    pub engine: SyncOrchestrator<MemoryRemote, MemoryStore>,
}

impl TestHarness {
    /// Create a harness with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(MemoryStore::new());
        let engine = SyncOrchestrator::new(
            Arc::clone(&remote),
            Arc::clone(&store),
            Session::new(Self::me()),
            config,
        );
        Self {
            remote,
            store,
            engine,
        }
    }

    /// The session's profile.
    pub fn me() -> ProfileId {
        ProfileId::new("me")
    }

    /// Another participant.
    pub fn alice() -> ProfileId {
        ProfileId::new("alice")
    }

    /// Seed a remote conversation with `messages` text messages from alice.
    pub async fn seed(&self, id: &str, messages: usize) -> ConversationSummary {
        let summary = self.remote.seed_conversation(id, id).await;
        for i in 0..messages {
            self.remote
                .append_message(&summary.id, &Self::alice(), &format!("message {}", i))
                .await;
        }
        self.remote.summary(&summary.id).await.unwrap_or(summary)
    }

    /// Seed `count` conversations named `conv-000`, `conv-001`, ...
    pub async fn seed_many(&self, count: usize, messages: usize) -> Vec<ConversationSummary> {
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.seed(&format!("conv-{:03}", i), messages).await);
        }
        out
    }

    /// Push every remote event after `after` to the engine, in order.
    pub async fn push_after(&self, id: &ConversationId, after: EventId) -> usize {
        let events: Vec<RemoteEvent> = self
            .remote
            .events(id)
            .await
            .into_iter()
            .filter(|e| e.event_id > after)
            .collect();
        let count = events.len();
        for event in events {
            let _ = self
                .engine
                .handle_incoming(threadline_core::IncomingEvent::Timeline(event))
                .await;
        }
        count
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

pub fn summary(id: &str, version: &str, latest: i64, updated_on: i64) -> ConversationSummary {
    ConversationSummary {
        id: ConversationId::new(id),
        version: Some(VersionToken::new(version)),
        latest_remote_event_id: EventId::new(latest),
        updated_on,
        meta: ConversationMeta::named(id),
    }
}

/// A local record that has completed a backfill up to `last_local`.
pub fn backfilled(id: &str, version: &str, last_local: i64, updated_on: i64) -> ConversationRecord {
    let mut record = ConversationRecord::from_summary(&summary(id, version, last_local, updated_on));
    record.record_local_events(EventId::new(1.min(last_local)), EventId::new(last_local));
    record
}

/// A local record still waiting for its first backfill.
pub fn placeholder(id: &str, version: &str, updated_on: i64) -> ConversationRecord {
    ConversationRecord::from_summary(&summary(id, version, -1, updated_on))
}

pub fn text_event(conversation: &str, event_id: i64, message_id: &str, text: &str) -> RemoteEvent {
    let conversation_id = ConversationId::new(conversation);
    RemoteEvent::new(
        conversation_id.clone(),
        EventId::new(event_id),
        EventKind::MessageSent(MessageRecord {
            message_id: MessageId::new(message_id),
            conversation_id,
            sent_event_id: EventId::new(event_id),
            sender: TestHarness::alice(),
            sent_on: 1_700_000_000_000 + event_id,
            parts: vec![MessagePart::text(text)],
            statuses: Vec::new(),
            send_state: SendState::Sent,
        }),
    )
}

pub fn status_event(
    conversation: &str,
    event_id: i64,
    message_id: &str,
    profile: &str,
    status: DeliveryStatus,
) -> RemoteEvent {
    let conversation_id = ConversationId::new(conversation);
    RemoteEvent::new(
        conversation_id.clone(),
        EventId::new(event_id),
        EventKind::StatusUpdated(MessageStatusRecord {
            conversation_id,
            message_id: MessageId::new(message_id),
            profile_id: ProfileId::new(profile),
            status,
            event_id: EventId::new(event_id),
            updated_on: 1_700_000_000_000 + event_id,
        }),
    )
}
