//! Conversation reconciliation: a pure diff between the remote conversation
//! list and the local cache.

use std::collections::BTreeMap;

use crate::conversation::{ConversationRecord, ConversationSummary};
use crate::types::{ConversationId, EventId};

/// The writes needed to bring the local cache in line with the remote list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Remote-only conversations, seeded with sentinel local bounds.
    pub to_add: Vec<ConversationRecord>,
    /// Conversations present on both sides whose remote metadata changed.
    pub to_update: Vec<ConversationRecord>,
    /// Local-only conversations.
    pub to_delete: Vec<ConversationId>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Total number of writes.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_delete.len()
    }
}

/// Diff remote summaries against local records.
///
/// Outputs are ordered by conversation id. A conversation present on both
/// sides is only updated once it has completed a backfill; an uninitialized
/// local placeholder is left for its pending initial backfill to refresh.
pub fn reconcile(remote: &[ConversationSummary], local: &[ConversationRecord]) -> Reconciliation {
    let remote_by_id: BTreeMap<&ConversationId, &ConversationSummary> =
        remote.iter().map(|s| (&s.id, s)).collect();
    let local_by_id: BTreeMap<&ConversationId, &ConversationRecord> =
        local.iter().map(|r| (&r.id, r)).collect();

    let mut out = Reconciliation::default();

    for (id, summary) in &remote_by_id {
        match local_by_id.get(id) {
            None => out.to_add.push(ConversationRecord::from_summary(summary)),
            Some(record) if record.is_initialized() && record.remote_differs(summary) => {
                let mut updated = (*record).clone();
                updated.apply_remote(summary);
                out.to_update.push(updated);
            }
            Some(_) => {}
        }
    }

    out.to_delete = local_by_id
        .keys()
        .filter(|id| !remote_by_id.contains_key(*id))
        .map(|id| (*id).clone())
        .collect();

    out
}

/// Single-conversation variant: update only if the remote has moved past
/// the stored high-water mark.
pub fn reconcile_single(
    remote_latest_event_id: EventId,
    local: &ConversationRecord,
) -> Reconciliation {
    if remote_latest_event_id <= local.latest_remote_event_id {
        return Reconciliation::default();
    }
    let mut updated = local.clone();
    updated.observe_remote_event(remote_latest_event_id);
    Reconciliation {
        to_update: vec![updated],
        ..Reconciliation::default()
    }
}
