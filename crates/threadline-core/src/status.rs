//! Per-profile delivery statuses.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, EventId, MessageId, ProfileId};

/// Delivery status of a message for one profile.
///
/// Totally ordered: `Sent < Delivered < Read`. A status only ever moves
/// forward along this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }
}

/// Status of one message for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusRecord {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub profile_id: ProfileId,
    pub status: DeliveryStatus,
    pub event_id: EventId,
    /// Unix ms.
    pub updated_on: i64,
}

impl MessageStatusRecord {
    /// Whether writing `self` over `existing` moves the status forward.
    ///
    /// Equal or lower statuses are no-ops, which makes re-applying the same
    /// status event idempotent.
    pub fn supersedes(&self, existing: Option<&MessageStatusRecord>) -> bool {
        match existing {
            None => true,
            Some(current) => self.status > current.status,
        }
    }
}
