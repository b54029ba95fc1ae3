//! Proptest generators for property-based testing.

use proptest::prelude::*;

use threadline_core::{
    ConversationId, ConversationMeta, ConversationSummary, DeliveryStatus, EventId, EventKind,
    ProfileId, RemoteEvent, VersionToken,
};

use crate::fixtures::{status_event, text_event};

/// Generate a conversation id.
pub fn conversation_id() -> impl Strategy<Value = ConversationId> {
    "[a-z]{1,8}".prop_map(ConversationId::new)
}

/// Generate a profile id from a small pool, so statuses collide.
pub fn profile_id() -> impl Strategy<Value = ProfileId> {
    prop_oneof![Just("alice"), Just("bob"), Just("carol")].prop_map(ProfileId::new)
}

pub fn delivery_status() -> impl Strategy<Value = DeliveryStatus> {
    prop_oneof![
        Just(DeliveryStatus::Sent),
        Just(DeliveryStatus::Delivered),
        Just(DeliveryStatus::Read),
    ]
}

/// Generate a remote conversation summary.
pub fn summary() -> impl Strategy<Value = ConversationSummary> {
    (
        conversation_id(),
        0u32..5,
        -1i64..100,
        0i64..=1_700_000_000_000i64,
        "[A-Za-z ]{0,12}",
    )
        .prop_map(|(id, version, latest, updated_on, name)| ConversationSummary {
            id,
            version: Some(VersionToken::new(format!("v{}", version))),
            latest_remote_event_id: EventId::new(latest),
            updated_on,
            meta: ConversationMeta::named(name),
        })
}

/// Shape of one generated event, before ids are assigned.
#[derive(Debug, Clone)]
enum EventShape {
    Message,
    /// Status for the message sent at position `target` (which may come
    /// later in the stream, or never).
    Status {
        target: usize,
        profile: ProfileId,
        status: DeliveryStatus,
    },
    Unknown,
}

fn event_shape(max_len: usize) -> impl Strategy<Value = EventShape> {
    prop_oneof![
        3 => Just(EventShape::Message),
        3 => (0..max_len.max(1), profile_id(), delivery_status()).prop_map(
            |(target, profile, status)| EventShape::Status {
                target,
                profile,
                status,
            }
        ),
        1 => Just(EventShape::Unknown),
    ]
}

/// Generate a conversation's event stream with ids `1..=n`.
///
/// Message `k` (by stream position) has id `m{k}`. Status events target
/// random positions, so some arrive before their message and some refer to
/// a message that never arrives.
pub fn event_stream(
    conversation: &'static str,
    max_len: usize,
) -> impl Strategy<Value = Vec<RemoteEvent>> {
    prop::collection::vec(event_shape(max_len), 1..=max_len.max(1)).prop_map(move |shapes| {
        shapes
            .into_iter()
            .enumerate()
            .map(|(index, shape)| {
                let event_id = index as i64 + 1;
                match shape {
                    EventShape::Message => {
                        text_event(conversation, event_id, &format!("m{}", index), "body")
                    }
                    EventShape::Status {
                        target,
                        profile,
                        status,
                    } => status_event(
                        conversation,
                        event_id,
                        &format!("m{}", target),
                        profile.as_str(),
                        status,
                    ),
                    EventShape::Unknown => RemoteEvent::new(
                        ConversationId::new(conversation),
                        EventId::new(event_id),
                        EventKind::Unknown {
                            kind: "reaction_added".into(),
                        },
                    ),
                }
            })
            .collect()
    })
}

/// Split `events` into consecutive pages at the given cut points.
pub fn paginate(events: &[RemoteEvent], cuts: &[usize]) -> Vec<Vec<RemoteEvent>> {
    let mut bounds: Vec<usize> = cuts
        .iter()
        .map(|c| c % (events.len() + 1))
        .collect();
    bounds.push(0);
    bounds.push(events.len());
    bounds.sort_unstable();
    bounds.dedup();
    bounds
        .windows(2)
        .map(|w| events[w[0]..w[1]].to_vec())
        .filter(|page| !page.is_empty())
        .collect()
}
