//! PostgreSQL storage for haggle conversations.
//!
//! [`PgConversationStore`] implements [`ConversationStore`] and
//! [`ListingStore`]. The aggregate is written in one transaction and guarded
//! by a `revision` column; a save whose expected revision no longer matches
//! updates no rows and comes back as [`StoreError::Conflict`].
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE listings (
//!     id UUID PRIMARY KEY,
//!     author_id UUID NOT NULL,
//!     listing_type TEXT NOT NULL CHECK (listing_type IN ('offer', 'request')),
//!     open BOOLEAN NOT NULL DEFAULT TRUE
//! );
//!
//! CREATE TABLE conversations (
//!     id UUID PRIMARY KEY,
//!     title VARCHAR(120) NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN
//!         ('pending', 'accepted', 'rejected', 'free', 'confirmed', 'canceled')),
//!     listing_id UUID NOT NULL REFERENCES listings (id),
//!     revision BIGINT NOT NULL DEFAULT 1,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE participations (
//!     conversation_id UUID NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
//!     person_id UUID NOT NULL,
//!     position INTEGER NOT NULL,
//!     is_read BOOLEAN NOT NULL DEFAULT FALSE,
//!     last_sent_at TIMESTAMPTZ,
//!     last_received_at TIMESTAMPTZ,
//!     feedback_given BOOLEAN NOT NULL DEFAULT FALSE,
//!     feedback_skipped BOOLEAN NOT NULL DEFAULT FALSE,
//!     UNIQUE (conversation_id, person_id)
//! );
//!
//! CREATE TABLE messages (
//!     id UUID PRIMARY KEY,
//!     conversation_id UUID NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
//!     sender_id UUID NOT NULL,
//!     content TEXT NOT NULL,
//!     sequence INTEGER NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     UNIQUE (conversation_id, sequence)
//! );
//!
//! CREATE INDEX idx_participations_person ON participations (person_id);
//! CREATE INDEX idx_conversations_listing ON conversations (listing_id);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use haggle_persistence::PgConversationStore;
//! use haggle_job_postgres::PgJobStore;
//!
//! let pool = PgPool::connect("postgres://localhost/haggle").await?;
//! let store = Arc::new(PgConversationStore::new(pool.clone()));
//! let service = ConversationService::new(store, Arc::new(PgJobStore::new(pool)));
//! ```

mod rows;

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use haggle_core::{
    Conversation, ConversationId, ConversationStore, Listing, ListingId, ListingStore, Message,
    PersonId, Revision, StoreError,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::rows::{revision_to_db, ConversationRow, ListingRow, MessageRow, ParticipationRow};

const CONVERSATION_COLUMNS: &str =
    "id, title, status, listing_id, created_at, updated_at, revision";

#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or refresh a listing. The catalog lives elsewhere; this keeps
    /// the local copy the unread count joins against.
    pub async fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listings (id, author_id, listing_type, open)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET author_id = EXCLUDED.author_id,
                listing_type = EXCLUDED.listing_type,
                open = EXCLUDED.open
            "#,
        )
        .bind(listing.id.into_uuid())
        .bind(listing.author_id.into_uuid())
        .bind(listing.listing_type.as_str())
        .bind(listing.open)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Opens a repeatable-read transaction so the parent row and its
    /// children come from one snapshot.
    async fn snapshot_tx(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let mut tx = self.snapshot_tx().await?;

        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM conversations WHERE id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(id.into_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let ids = vec![row.id];
        let mut participations = fetch_participations(&mut tx, &ids).await?;
        let mut messages = fetch_messages(&mut tx, &ids).await?;
        tx.commit().await?;

        let conversation = row.into_conversation(
            participations.remove(&id.into_uuid()).unwrap_or_default(),
            messages.remove(&id.into_uuid()).unwrap_or_default(),
        )?;
        Ok(Some(conversation))
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<Revision> {
        let revision = Revision::NONE.next();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, status, listing_id, revision, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(conversation.id().into_uuid())
        .bind(conversation.title())
        .bind(conversation.status().as_str())
        .bind(conversation.listing_id().into_uuid())
        .bind(revision_to_db(revision)?)
        .bind(conversation.created_at())
        .bind(conversation.updated_at())
        .execute(&mut *tx)
        .await?;

        write_children(&mut tx, conversation).await?;
        tx.commit().await?;

        Ok(revision)
    }

    /// `None` when the stored revision moved or the row is gone.
    async fn save_conversation(
        &self,
        conversation: &Conversation,
        expected: Revision,
    ) -> Result<Option<Revision>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET title = $1,
                status = $2,
                updated_at = $3,
                revision = revision + 1
            WHERE id = $4 AND revision = $5
            "#,
        )
        .bind(conversation.title())
        .bind(conversation.status().as_str())
        .bind(conversation.updated_at())
        .bind(conversation.id().into_uuid())
        .bind(revision_to_db(expected)?)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        write_children(&mut tx, conversation).await?;
        tx.commit().await?;

        Ok(Some(expected.next()))
    }

    async fn conversations_for_person(&self, person: PersonId) -> Result<Vec<Conversation>> {
        let mut tx = self.snapshot_tx().await?;

        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT c.id, c.title, c.status, c.listing_id, c.created_at, c.updated_at, c.revision
            FROM conversations c
            JOIN participations p ON p.conversation_id = c.id
            WHERE p.person_id = $1
            ORDER BY c.updated_at DESC
            "#,
        )
        .bind(person.into_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut participations = fetch_participations(&mut tx, &ids).await?;
        let mut messages = fetch_messages(&mut tx, &ids).await?;
        tx.commit().await?;

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_conversation(
                    participations.remove(&id).unwrap_or_default(),
                    messages.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn count_unread(&self, person: PersonId) -> Result<i64> {
        // Unread flag, or a pending conversation on a listing the person wrote.
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM conversations c
            JOIN participations p ON p.conversation_id = c.id AND p.person_id = $1
            JOIN listings l ON l.id = c.listing_id
            WHERE p.is_read = FALSE
               OR (c.status = 'pending' AND l.author_id = $1)
            "#,
        )
        .bind(person.into_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Replace participations and append the messages above the stored
/// maximum sequence. Messages are append-only.
async fn write_children(
    tx: &mut Transaction<'static, Postgres>,
    conversation: &Conversation,
) -> Result<()> {
    let conversation_id = conversation.id().into_uuid();

    sqlx::query("DELETE FROM participations WHERE conversation_id = $1")
        .bind(conversation_id)
        .execute(&mut **tx)
        .await?;

    for (position, p) in conversation.participations().iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO participations (
                conversation_id, person_id, position, is_read,
                last_sent_at, last_received_at, feedback_given, feedback_skipped
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(conversation_id)
        .bind(p.person_id.into_uuid())
        .bind(i32::try_from(position).map_err(|_| anyhow!("too many participants"))?)
        .bind(p.is_read)
        .bind(p.last_sent_at)
        .bind(p.last_received_at)
        .bind(p.feedback_given)
        .bind(p.feedback_skipped)
        .execute(&mut **tx)
        .await?;
    }

    let stored_max: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence), 0) FROM messages WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_one(&mut **tx)
    .await?;

    for m in unsent_messages(conversation.messages(), stored_max) {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, sequence, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (conversation_id, sequence) DO NOTHING
            "#,
        )
        .bind(m.id.into_uuid())
        .bind(conversation_id)
        .bind(m.sender_id.into_uuid())
        .bind(&m.content)
        .bind(m.sequence)
        .bind(m.created_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// The tail of `messages` (ordered by sequence) not yet stored.
fn unsent_messages(messages: &[Message], stored_max: i32) -> &[Message] {
    &messages[messages.partition_point(|m| m.sequence <= stored_max)..]
}

async fn fetch_participations(
    tx: &mut Transaction<'static, Postgres>,
    conversation_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<ParticipationRow>>> {
    let rows = sqlx::query_as::<_, ParticipationRow>(
        r#"
        SELECT conversation_id, person_id, is_read, last_sent_at, last_received_at,
               feedback_given, feedback_skipped
        FROM participations
        WHERE conversation_id = ANY($1)
        ORDER BY conversation_id, position
        "#,
    )
    .bind(conversation_ids)
    .fetch_all(&mut **tx)
    .await?;

    Ok(group_by_conversation(rows, |r| r.conversation_id))
}

async fn fetch_messages(
    tx: &mut Transaction<'static, Postgres>,
    conversation_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<MessageRow>>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, conversation_id, sender_id, content, sequence, created_at
        FROM messages
        WHERE conversation_id = ANY($1)
        ORDER BY conversation_id, sequence
        "#,
    )
    .bind(conversation_ids)
    .fetch_all(&mut **tx)
    .await?;

    Ok(group_by_conversation(rows, |r| r.conversation_id))
}

/// Keeps the incoming order within each group.
fn group_by_conversation<T>(rows: Vec<T>, key: impl Fn(&T) -> Uuid) -> HashMap<Uuid, Vec<T>> {
    let mut grouped: HashMap<Uuid, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row)).or_default().push(row);
    }
    grouped
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn insert(&self, conversation: &Conversation) -> Result<Revision, StoreError> {
        Ok(self.insert_conversation(conversation).await?)
    }

    async fn load(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.load_conversation(id).await?)
    }

    async fn save(
        &self,
        conversation: &Conversation,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        match self.save_conversation(conversation, expected).await? {
            Some(revision) => Ok(revision),
            None => {
                debug!(
                    conversation_id = %conversation.id(),
                    expected = %expected,
                    "stale save rejected"
                );
                Err(StoreError::Conflict)
            }
        }
    }

    async fn delete(&self, id: ConversationId) -> Result<bool, StoreError> {
        // Participations and messages go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id.into_uuid())
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn conversations_for(&self, person: PersonId) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.conversations_for_person(person).await?)
    }

    async fn unread_count(&self, person: PersonId) -> Result<i64, StoreError> {
        Ok(self.count_unread(person).await?)
    }
}

#[async_trait]
impl ListingStore for PgConversationStore {
    async fn load_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query_as::<_, ListingRow>(
            "SELECT id, author_id, listing_type, open FROM listings WHERE id = $1",
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(row.map(Listing::try_from).transpose()?)
    }

    async fn close_listing(&self, id: ListingId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE listings SET open = FALSE WHERE id = $1")
            .bind(id.into_uuid())
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(anyhow!("listing {} not found", id)));
        }
        Ok(())
    }
}
