//! Conversation participants.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, ProfileId};

/// Membership of one profile in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub conversation_id: ConversationId,
    pub profile_id: ProfileId,
    pub role: String,
}

impl ParticipantRecord {
    pub fn new(
        conversation_id: ConversationId,
        profile_id: ProfileId,
        role: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            profile_id,
            role: role.into(),
        }
    }
}
