//! Row shapes and their mapping onto the aggregate.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use haggle_core::{
    Conversation, ConversationSnapshot, ConversationStatus, Listing, ListingType, Message,
    Participation, Revision,
};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ConversationRow {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub listing_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ParticipationRow {
    pub conversation_id: Uuid,
    pub person_id: Uuid,
    pub is_read: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_received_at: Option<DateTime<Utc>>,
    pub feedback_given: bool,
    pub feedback_skipped: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sequence: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ListingRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub listing_type: String,
    pub open: bool,
}

impl ConversationRow {
    /// Rebuild the aggregate. Children must already be ordered by position
    /// and sequence; `Conversation::restore` re-checks every invariant.
    pub fn into_conversation(
        self,
        participations: Vec<ParticipationRow>,
        messages: Vec<MessageRow>,
    ) -> Result<Conversation> {
        let status: ConversationStatus = self
            .status
            .parse()
            .with_context(|| format!("conversation {} has a bad status", self.id))?;

        let snapshot = ConversationSnapshot {
            id: self.id.into(),
            title: self.title,
            status,
            listing_id: self.listing_id.into(),
            participations: participations.into_iter().map(Participation::from).collect(),
            messages: messages.into_iter().map(Message::from).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            revision: revision_from_db(self.revision)?,
        };

        Conversation::restore(snapshot)
            .with_context(|| format!("conversation {} failed to restore", self.id))
    }
}

impl From<ParticipationRow> for Participation {
    fn from(row: ParticipationRow) -> Self {
        Participation {
            person_id: row.person_id.into(),
            is_read: row.is_read,
            last_sent_at: row.last_sent_at,
            last_received_at: row.last_received_at,
            feedback_given: row.feedback_given,
            feedback_skipped: row.feedback_skipped,
        }
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id.into(),
            conversation_id: row.conversation_id.into(),
            sender_id: row.sender_id.into(),
            content: row.content,
            sequence: row.sequence,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<ListingRow> for Listing {
    type Error = anyhow::Error;

    fn try_from(row: ListingRow) -> Result<Self> {
        let listing_type: ListingType = row.listing_type.parse()?;
        Ok(Listing {
            id: row.id.into(),
            author_id: row.author_id.into(),
            listing_type,
            open: row.open,
        })
    }
}

pub(crate) fn revision_to_db(revision: Revision) -> Result<i64> {
    i64::try_from(revision.value()).map_err(|_| anyhow!("revision {} out of range", revision))
}

pub(crate) fn revision_from_db(value: i64) -> Result<Revision> {
    u64::try_from(value)
        .map(Revision::new)
        .map_err(|_| anyhow!("negative revision {}", value))
}
