//! Gap detection on the live push stream.
//!
//! One counter per conversation holds the highest event id seen. Each pushed
//! event is compared against `counter + 1`; anything above it means the
//! stream skipped events, and the caller backfills exactly that range.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use threadline_core::{ConversationId, EventId};

/// Result of observing one pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapCheck {
    /// The event is the next one expected.
    InOrder,
    /// The event was already seen.
    Duplicate,
    /// Events `from..=to` never arrived.
    Gap { from: EventId, to: EventId },
}

impl GapCheck {
    pub fn is_gap(&self) -> bool {
        matches!(self, GapCheck::Gap { .. })
    }
}

/// Per-conversation monotonic counters fed by the push stream.
#[derive(Debug, Default)]
pub struct MissingEventTracker {
    counters: Mutex<HashMap<ConversationId, EventId>>,
}

impl MissingEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a counter exists for `id`.
    pub async fn is_tracking(&self, id: &ConversationId) -> bool {
        self.counters.lock().await.contains_key(id)
    }

    /// Seed or raise the counter, typically from the stored
    /// `last_local_event_id`. Never lowers it.
    pub async fn seed(&self, id: &ConversationId, last_seen: EventId) {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(id.clone()).or_insert(EventId::UNKNOWN);
        *counter = (*counter).max(last_seen);
    }

    /// Compare a pushed event against the counter and advance it.
    pub async fn observe(&self, id: &ConversationId, event_id: EventId) -> GapCheck {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(id.clone()).or_insert(EventId::UNKNOWN);
        let expected = counter.next();

        let check = if event_id < expected {
            GapCheck::Duplicate
        } else if event_id == expected {
            GapCheck::InOrder
        } else {
            GapCheck::Gap {
                from: expected,
                to: EventId::new(event_id.get() - 1),
            }
        };
        *counter = (*counter).max(event_id);

        if let GapCheck::Gap { from, to } = check {
            debug!(conversation = %id, %from, %to, "push stream gap detected");
        }
        check
    }

    pub async fn counter(&self, id: &ConversationId) -> Option<EventId> {
        self.counters.lock().await.get(id).copied()
    }

    /// Drop the counter of a deleted conversation.
    pub async fn forget(&self, id: &ConversationId) {
        self.counters.lock().await.remove(id);
    }
}
