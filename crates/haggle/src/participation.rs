//! Per-person state inside a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::PersonId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub person_id: PersonId,
    pub is_read: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_received_at: Option<DateTime<Utc>>,
    pub feedback_given: bool,
    pub feedback_skipped: bool,
}

impl Participation {
    /// The person who opened the conversation: read, with a send stamp.
    pub fn sender(person_id: PersonId, at: DateTime<Utc>) -> Self {
        Self {
            person_id,
            is_read: true,
            last_sent_at: Some(at),
            last_received_at: None,
            feedback_given: false,
            feedback_skipped: false,
        }
    }

    /// Anyone else in the opening set: unread, with a receive stamp.
    pub fn receiver(person_id: PersonId, at: DateTime<Utc>) -> Self {
        Self {
            person_id,
            is_read: false,
            last_sent_at: None,
            last_received_at: Some(at),
            feedback_given: false,
            feedback_skipped: false,
        }
    }

    /// Feedback is outstanding until it is either given or skipped.
    pub fn feedback_can_be_given(&self) -> bool {
        !self.feedback_given && !self.feedback_skipped
    }

    pub fn has_feedback(&self) -> bool {
        self.feedback_given
    }

    pub(crate) fn stamp_sent(&mut self, at: DateTime<Utc>) {
        self.is_read = true;
        self.last_sent_at = Some(at);
    }

    pub(crate) fn stamp_received(&mut self, at: DateTime<Utc>) {
        self.is_read = false;
        self.last_received_at = Some(at);
    }
}
