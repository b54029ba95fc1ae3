//! Messages and their parts.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::status::MessageStatusRecord;
use crate::types::{ConversationId, EventId, MessageId, ProfileId};

/// One part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePart {
    /// Content carried inline in the message payload.
    Inline { content_type: String, body: Bytes },

    /// An uploaded attachment.
    Attachment {
        name: String,
        content_type: String,
        url: String,
        size: u64,
    },

    /// Local-only stand-in shown while an attachment uploads.
    Uploading { name: String, size: u64 },

    /// Local-only marker for an attachment that failed to upload.
    Error { name: String, reason: String },
}

impl MessagePart {
    /// A UTF-8 text part.
    pub fn text(body: impl Into<String>) -> Self {
        MessagePart::Inline {
            content_type: "text/plain".into(),
            body: Bytes::from(body.into()),
        }
    }

    /// Byte length of an inline body.
    pub fn inline_len(&self) -> Option<usize> {
        match self {
            MessagePart::Inline { body, .. } => Some(body.len()),
            _ => None,
        }
    }

    /// Whether this part is never sent to the remote service.
    pub fn is_local_only(&self) -> bool {
        matches!(self, MessagePart::Uploading { .. } | MessagePart::Error { .. })
    }
}

/// Where a message is in its send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendState {
    /// Optimistic placeholder; the send is in flight.
    Pending,
    /// Confirmed by the server (or received from it).
    Sent,
    /// The send failed. Terminal: a retry creates a new pending message.
    Errored { reason: String },
}

/// A locally cached message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    /// `UNKNOWN` while pending.
    pub sent_event_id: EventId,
    pub sender: ProfileId,
    /// Unix ms.
    pub sent_on: i64,
    pub parts: Vec<MessagePart>,
    /// Hydrated from the status table on read; ignored on write.
    #[serde(default)]
    pub statuses: Vec<MessageStatusRecord>,
    pub send_state: SendState,
}

impl MessageRecord {
    /// Build an optimistic placeholder keyed by a fresh temporary id.
    pub fn pending(
        conversation_id: ConversationId,
        sender: ProfileId,
        sent_on: i64,
        parts: Vec<MessagePart>,
    ) -> Self {
        Self {
            message_id: MessageId::temporary(),
            conversation_id,
            sent_event_id: EventId::UNKNOWN,
            sender,
            sent_on,
            parts,
            statuses: Vec::new(),
            send_state: SendState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.send_state, SendState::Pending)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.send_state, SendState::Errored { .. })
    }

    /// Parts that may be sent to the remote service.
    pub fn transmittable_parts(&self) -> Vec<MessagePart> {
        self.parts
            .iter()
            .filter(|p| !p.is_local_only())
            .cloned()
            .collect()
    }
}
