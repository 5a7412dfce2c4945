//! Messages inside a conversation. Content is opaque to haggle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ConversationId, MessageId, PersonId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: PersonId,
    pub content: String,
    /// 1-based position in the conversation; append order.
    pub sequence: i32,
    pub created_at: DateTime<Utc>,
}

/// Attributes for a message that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: PersonId,
    pub content: String,
}

impl NewMessage {
    pub fn new(sender_id: PersonId, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            content: content.into(),
        }
    }
}
