//! Conversation records and the local merge rule.
//!
//! A [`ConversationRecord`] splits into two halves:
//!
//! - **Remote-authoritative fields**: version token, descriptive metadata,
//!   `updated_on`, and the highest event id the server has reported.
//! - **Local bounds**: the first and last event ids actually backfilled into
//!   the local store. Only the backfill path moves these.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, EventId, VersionToken};

/// Descriptive, remote-authoritative conversation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Role names recognised in this conversation.
    pub roles: Vec<String>,
}

impl ConversationMeta {
    /// Metadata with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// The remote service's view of a conversation, as returned by list/get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub version: Option<VersionToken>,
    pub latest_remote_event_id: EventId,
    /// Unix ms.
    pub updated_on: i64,
    pub meta: ConversationMeta,
}

/// A locally cached conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub version: Option<VersionToken>,

    /// Lowest event id held locally. Never regresses once known.
    pub first_local_event_id: EventId,

    /// Highest event id held locally.
    pub last_local_event_id: EventId,

    /// Highest event id the remote service is known to have.
    pub latest_remote_event_id: EventId,

    /// Unix ms of the last remote change.
    pub updated_on: i64,

    pub meta: ConversationMeta,
}

impl ConversationRecord {
    /// Seed a new record from a remote summary, with sentinel local bounds.
    pub fn from_summary(summary: &ConversationSummary) -> Self {
        Self {
            id: summary.id.clone(),
            version: summary.version.clone(),
            first_local_event_id: EventId::UNKNOWN,
            last_local_event_id: EventId::UNKNOWN,
            latest_remote_event_id: summary.latest_remote_event_id,
            updated_on: summary.updated_on,
            meta: summary.meta.clone(),
        }
    }

    /// Whether at least one backfill has completed for this conversation.
    pub fn is_initialized(&self) -> bool {
        self.last_local_event_id.is_known()
    }

    /// Whether the remote summary carries a different version or metadata.
    pub fn remote_differs(&self, summary: &ConversationSummary) -> bool {
        self.version != summary.version || self.meta != summary.meta
    }

    /// Overwrite remote-authoritative fields, keeping the local bounds.
    pub fn apply_remote(&mut self, summary: &ConversationSummary) {
        self.version = summary.version.clone();
        self.meta = summary.meta.clone();
        self.updated_on = summary.updated_on;
        self.observe_remote_event(summary.latest_remote_event_id);
    }

    /// Raise the remote high-water mark. Never lowers it.
    pub fn observe_remote_event(&mut self, event_id: EventId) {
        self.latest_remote_event_id = self.latest_remote_event_id.max(event_id);
    }

    /// Record that events in `first..=last` are now held locally.
    ///
    /// The first bound is only set while unknown; the last bound only moves
    /// forward. The remote high-water mark is raised so that
    /// `last_local_event_id <= latest_remote_event_id` keeps holding.
    pub fn record_local_events(&mut self, first: EventId, last: EventId) {
        if !self.first_local_event_id.is_known() && first.is_known() {
            self.first_local_event_id = first;
        }
        self.last_local_event_id = self.last_local_event_id.max(last);
        self.observe_remote_event(self.last_local_event_id);
    }

    /// Mark an exhausted backfill over an empty history.
    pub fn mark_backfilled(&mut self) {
        if !self.last_local_event_id.is_known() {
            self.last_local_event_id = EventId::ZERO;
            self.observe_remote_event(EventId::ZERO);
        }
    }

    /// The first event id the next backfill should request.
    pub fn backfill_start(&self) -> EventId {
        self.last_local_event_id.next()
    }

    /// Whether the remote side is known to hold events we do not.
    pub fn is_behind_remote(&self) -> bool {
        self.latest_remote_event_id > self.last_local_event_id
    }
}

/// Merge an incoming conversation into the stored one.
///
/// - First-seen conversations are stored with sentinel local bounds.
/// - Known conversations keep their local bounds; remote-authoritative fields
///   are overwritten only if `incoming.updated_on` is not older than the
///   stored value.
///
/// Returns `None` when the stored record should be left untouched.
pub fn merge_conversation(
    existing: Option<&ConversationRecord>,
    incoming: &ConversationRecord,
) -> Option<ConversationRecord> {
    match existing {
        None => Some(ConversationRecord {
            first_local_event_id: EventId::UNKNOWN,
            last_local_event_id: EventId::UNKNOWN,
            ..incoming.clone()
        }),
        Some(stored) if incoming.updated_on < stored.updated_on => None,
        Some(stored) => {
            let mut merged = stored.clone();
            merged.version = incoming.version.clone();
            merged.meta = incoming.meta.clone();
            merged.updated_on = incoming.updated_on;
            merged.observe_remote_event(incoming.latest_remote_event_id);
            Some(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, version: &str, latest: i64, updated_on: i64) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId::new(id),
            version: Some(VersionToken::new(version)),
            latest_remote_event_id: EventId::new(latest),
            updated_on,
            meta: ConversationMeta::named(id),
        }
    }

    #[test]
    fn test_from_summary_has_sentinel_bounds() {
        let record = ConversationRecord::from_summary(&summary("a", "v1", 9, 100));
        assert_eq!(record.first_local_event_id, EventId::UNKNOWN);
        assert_eq!(record.last_local_event_id, EventId::UNKNOWN);
        assert_eq!(record.latest_remote_event_id, EventId::new(9));
        assert!(!record.is_initialized());
        assert_eq!(record.backfill_start(), EventId::ZERO);
    }

    #[test]
    fn test_record_local_events_is_monotonic() {
        let mut record = ConversationRecord::from_summary(&summary("a", "v1", 3, 100));
        record.record_local_events(EventId::new(1), EventId::new(5));
        assert_eq!(record.first_local_event_id, EventId::new(1));
        assert_eq!(record.last_local_event_id, EventId::new(5));
        assert_eq!(record.latest_remote_event_id, EventId::new(5));

        record.record_local_events(EventId::new(0), EventId::new(2));
        assert_eq!(record.first_local_event_id, EventId::new(1));
        assert_eq!(record.last_local_event_id, EventId::new(5));
    }

    #[test]
    fn test_mark_backfilled_only_touches_sentinel() {
        let mut empty = ConversationRecord::from_summary(&summary("a", "v1", -1, 100));
        empty.mark_backfilled();
        assert_eq!(empty.last_local_event_id, EventId::ZERO);
        assert_eq!(empty.latest_remote_event_id, EventId::ZERO);
        assert!(empty.is_initialized());

        let mut full = ConversationRecord::from_summary(&summary("b", "v1", 4, 100));
        full.record_local_events(EventId::new(1), EventId::new(4));
        full.mark_backfilled();
        assert_eq!(full.last_local_event_id, EventId::new(4));
    }

    #[test]
    fn test_merge_first_seen_resets_local_bounds() {
        let mut incoming = ConversationRecord::from_summary(&summary("a", "v1", 9, 100));
        incoming.last_local_event_id = EventId::new(9);
        let merged = merge_conversation(None, &incoming).unwrap();
        assert_eq!(merged.last_local_event_id, EventId::UNKNOWN);
        assert_eq!(merged.latest_remote_event_id, EventId::new(9));
    }

    #[test]
    fn test_merge_keeps_local_bounds() {
        let mut stored = ConversationRecord::from_summary(&summary("a", "v1", 5, 100));
        stored.record_local_events(EventId::new(1), EventId::new(5));

        let incoming = ConversationRecord::from_summary(&summary("a", "v2", 8, 200));
        let merged = merge_conversation(Some(&stored), &incoming).unwrap();
        assert_eq!(merged.version, Some(VersionToken::new("v2")));
        assert_eq!(merged.first_local_event_id, EventId::new(1));
        assert_eq!(merged.last_local_event_id, EventId::new(5));
        assert_eq!(merged.latest_remote_event_id, EventId::new(8));
        assert_eq!(merged.updated_on, 200);
    }

    #[test]
    fn test_merge_ignores_older_update() {
        let stored = ConversationRecord::from_summary(&summary("a", "v2", 5, 200));
        let incoming = ConversationRecord::from_summary(&summary("a", "v1", 9, 100));
        assert!(merge_conversation(Some(&stored), &incoming).is_none());
    }

    #[test]
    fn test_merge_equal_timestamp_applies() {
        let stored = ConversationRecord::from_summary(&summary("a", "v1", 5, 200));
        let incoming = ConversationRecord::from_summary(&summary("a", "v2", 5, 200));
        let merged = merge_conversation(Some(&stored), &incoming).unwrap();
        assert_eq!(merged.version, Some(VersionToken::new("v2")));
    }
}
