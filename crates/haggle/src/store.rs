//! Persistence contracts.
//!
//! # The Contract
//!
//! 1. **The aggregate is the unit of consistency.** A conversation is loaded
//!    and saved whole: status, participations and messages together.
//!
//! 2. **Save checks the revision.** `save` succeeds only if the stored
//!    revision still equals the one the caller loaded; otherwise it returns
//!    [`StoreError::Conflict`] and writes nothing.
//!
//! 3. **Delete cascades.** Deleting a conversation removes its messages and
//!    participations; nothing orphaned stays queryable.
//!
//! 4. **Unread counts are one query.** Implementations answer
//!    [`ConversationStore::unread_count`] from a single join, never by loading
//!    conversations one by one.

use async_trait::async_trait;

use crate::conversation::Conversation;
use crate::error::StoreError;
use crate::id::{ConversationId, ListingId, PersonId};
use crate::listing::Listing;

/// Revision for optimistic concurrency control.
///
/// [`Revision::NONE`] marks an aggregate that has never been saved. Every
/// successful save advances it by one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Revision(pub u64);

impl Revision {
    pub const NONE: Revision = Revision(0);

    pub fn new(value: u64) -> Self {
        Revision(value)
    }

    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    /// Persist a brand-new conversation. Returns its first revision.
    async fn insert(&self, conversation: &Conversation) -> Result<Revision, StoreError>;

    /// Load a consistent snapshot, or `None` if it does not exist.
    async fn load(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;

    /// Save with optimistic concurrency control. `expected` must match the
    /// stored revision. Returns the new revision.
    async fn save(
        &self,
        conversation: &Conversation,
        expected: Revision,
    ) -> Result<Revision, StoreError>;

    /// Delete a conversation with its messages and participations.
    /// Returns false if it did not exist.
    async fn delete(&self, id: ConversationId) -> Result<bool, StoreError>;

    /// Every conversation the person participates in.
    async fn conversations_for(&self, person: PersonId) -> Result<Vec<Conversation>, StoreError>;

    /// Number of conversations the person should see as unread.
    /// See [`crate::unread`] for the rule.
    async fn unread_count(&self, person: PersonId) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait ListingStore: Send + Sync + 'static {
    async fn load_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError>;

    /// Set the listing's `open` flag to false. Closing a closed listing is a
    /// no-op.
    async fn close_listing(&self, id: ListingId) -> Result<(), StoreError>;
}
