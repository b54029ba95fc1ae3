//! Events from the remote service: timeline events, push events, and
//! orphaned status events.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationSummary;
use crate::error::{CoreError, Result};
use crate::message::MessageRecord;
use crate::participant::ParticipantRecord;
use crate::status::MessageStatusRecord;
use crate::types::{ConversationId, EventId, MessageId, ProfileId};

/// One entry of a conversation's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub conversation_id: ConversationId,
    pub event_id: EventId,
    pub kind: EventKind,
}

/// What a timeline event carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    MessageSent(MessageRecord),
    /// A delivered or read receipt.
    StatusUpdated(MessageStatusRecord),
    ParticipantsAdded(Vec<ParticipantRecord>),
    ParticipantsRemoved(Vec<ProfileId>),
    /// A kind this client does not understand. Skipped, but the event id
    /// still counts as consumed.
    Unknown { kind: String },
}

impl RemoteEvent {
    pub fn new(conversation_id: ConversationId, event_id: EventId, kind: EventKind) -> Self {
        Self {
            conversation_id,
            event_id,
            kind,
        }
    }

    pub fn kind_name(&self) -> &str {
        match &self.kind {
            EventKind::MessageSent(_) => "message_sent",
            EventKind::StatusUpdated(_) => "status_updated",
            EventKind::ParticipantsAdded(_) => "participants_added",
            EventKind::ParticipantsRemoved(_) => "participants_removed",
            EventKind::Unknown { kind } => kind,
        }
    }
}

/// An event pushed to the client by the live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncomingEvent {
    ConversationCreated(ConversationSummary),
    ConversationUpdated(ConversationSummary),
    ConversationDeleted(ConversationId),
    /// An event belonging to a conversation's ordered event stream.
    Timeline(RemoteEvent),
}

/// A status event that arrived before the message it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedEvent {
    pub event_id: EventId,
    pub conversation_id: ConversationId,
    pub related_message_id: MessageId,
    /// CBOR-encoded [`MessageStatusRecord`].
    pub payload: Vec<u8>,
}

impl OrphanedEvent {
    /// Park a status until its message is known.
    pub fn from_status(status: &MessageStatusRecord) -> Result<Self> {
        let mut payload = Vec::new();
        ciborium::into_writer(status, &mut payload)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(Self {
            event_id: status.event_id,
            conversation_id: status.conversation_id.clone(),
            related_message_id: status.message_id.clone(),
            payload,
        })
    }

    /// Recover the parked status.
    pub fn decode_status(&self) -> Result<MessageStatusRecord> {
        ciborium::from_reader(&self.payload[..])
            .map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DeliveryStatus;

    #[test]
    fn test_orphan_payload_preserves_status() {
        let status = MessageStatusRecord {
            conversation_id: ConversationId::new("c"),
            message_id: MessageId::new("m9"),
            profile_id: ProfileId::new("bob"),
            status: DeliveryStatus::Read,
            event_id: EventId::new(12),
            updated_on: 1_700_000_000_000,
        };
        let orphan = OrphanedEvent::from_status(&status).unwrap();
        assert_eq!(orphan.related_message_id, MessageId::new("m9"));
        assert_eq!(orphan.event_id, EventId::new(12));
        assert_eq!(orphan.decode_status().unwrap(), status);
    }

    #[test]
    fn test_corrupt_orphan_payload() {
        let orphan = OrphanedEvent {
            event_id: EventId::new(1),
            conversation_id: ConversationId::new("c"),
            related_message_id: MessageId::new("m"),
            payload: vec![0xff, 0x00],
        };
        assert!(matches!(
            orphan.decode_status(),
            Err(CoreError::DecodingError(_))
        ));
    }
}
