//! In-memory store backed by `DashMap`.
//!
//! Conversations are stored whole, so deleting one drops its messages and
//! participations with it. Useful for tests, demos and single-process
//! deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::conversation::Conversation;
use crate::error::StoreError;
use crate::id::{ConversationId, ListingId, PersonId};
use crate::listing::Listing;
use crate::store::{ConversationStore, ListingStore, Revision};
use crate::unread::is_unread_for;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: DashMap<ConversationId, Conversation>,
    listings: DashMap<ListingId, Listing>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a listing.
    pub fn put_listing(&self, listing: Listing) {
        self.listings.insert(listing.id, listing);
    }

    pub fn listing(&self, id: ListingId) -> Option<Listing> {
        self.listings.get(&id).map(|l| l.clone())
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn insert(&self, conversation: &Conversation) -> Result<Revision, StoreError> {
        let revision = Revision::NONE.next();
        match self.conversations.entry(conversation.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Backend(anyhow::anyhow!(
                "conversation {} already exists",
                conversation.id()
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = conversation.clone();
                stored.set_revision(revision);
                slot.insert(stored);
                Ok(revision)
            }
        }
    }

    async fn load(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.get(&id).map(|c| c.clone()))
    }

    async fn save(
        &self,
        conversation: &Conversation,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        // A conversation deleted since it was loaded is a conflict too.
        let mut stored = self
            .conversations
            .get_mut(&conversation.id())
            .ok_or(StoreError::Conflict)?;
        if stored.revision() != expected {
            debug!(
                conversation_id = %conversation.id(),
                expected = %expected,
                actual = %stored.revision(),
                "stale save rejected"
            );
            return Err(StoreError::Conflict);
        }

        let revision = expected.next();
        let mut next = conversation.clone();
        next.set_revision(revision);
        *stored = next;
        Ok(revision)
    }

    async fn delete(&self, id: ConversationId) -> Result<bool, StoreError> {
        Ok(self.conversations.remove(&id).is_some())
    }

    async fn conversations_for(&self, person: PersonId) -> Result<Vec<Conversation>, StoreError> {
        let mut found: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.is_participant(person))
            .map(|c| c.clone())
            .collect();
        found.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(found)
    }

    async fn unread_count(&self, person: PersonId) -> Result<i64, StoreError> {
        let count = self
            .conversations
            .iter()
            .filter(|c| {
                self.listings
                    .get(&c.listing_id())
                    .is_some_and(|listing| is_unread_for(&c, &listing, person))
            })
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl ListingStore for InMemoryStore {
    async fn load_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        Ok(self.listing(id))
    }

    async fn close_listing(&self, id: ListingId) -> Result<(), StoreError> {
        let mut listing = self
            .listings
            .get_mut(&id)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("listing {} does not exist", id)))?;
        listing.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::ListingType;

    fn seeded() -> (InMemoryStore, Conversation, PersonId, PersonId) {
        let store = InMemoryStore::new();
        let owner = PersonId::new();
        let asker = PersonId::new();
        let listing = Listing::new(owner, ListingType::Offer);
        let mut c = Conversation::new("Bike pump", listing.id).unwrap();
        c.set_participants([(asker, true), (owner, false)]).unwrap();
        store.put_listing(listing);
        (store, c, owner, asker)
    }

    #[tokio::test]
    async fn save_requires_the_loaded_revision() {
        let (store, c, owner, _) = seeded();
        let r1 = store.insert(&c).await.unwrap();
        assert_eq!(r1, Revision(1));

        let mut a = store.load(c.id()).await.unwrap().unwrap();
        let mut b = a.clone();
        a.mark_read(owner).unwrap();
        let r2 = store.save(&a, a.revision()).await.unwrap();
        assert_eq!(r2, Revision(2));

        b.give_feedback(owner).unwrap();
        assert!(matches!(
            store.save(&b, b.revision()).await,
            Err(StoreError::Conflict)
        ));

        let stored = store.load(c.id()).await.unwrap().unwrap();
        assert!(stored.is_read_by(owner).unwrap());
        assert!(!stored.has_feedback_from(owner).unwrap());
        assert_eq!(stored.revision(), Revision(2));
    }

    #[tokio::test]
    async fn double_insert_is_rejected() {
        let (store, c, _, _) = seeded();
        store.insert(&c).await.unwrap();
        assert!(store.insert(&c).await.is_err());
    }

    #[tokio::test]
    async fn delete_leaves_nothing_queryable() {
        let (store, c, owner, asker) = seeded();
        store.insert(&c).await.unwrap();

        assert!(store.delete(c.id()).await.unwrap());
        assert!(!store.delete(c.id()).await.unwrap());
        assert!(store.load(c.id()).await.unwrap().is_none());
        assert!(store.conversations_for(asker).await.unwrap().is_empty());
        assert_eq!(store.unread_count(owner).await.unwrap(), 0);
        assert!(matches!(
            store.save(&c, Revision(1)).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    async fn unread_count_applies_owner_rule() {
        let (store, mut c, owner, asker) = seeded();
        c.mark_read(owner).unwrap();
        store.insert(&c).await.unwrap();

        assert_eq!(store.unread_count(owner).await.unwrap(), 1);
        assert_eq!(store.unread_count(asker).await.unwrap(), 0);
        assert_eq!(store.unread_count(PersonId::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn close_listing_clears_open_flag() {
        let (store, c, _, _) = seeded();
        store.close_listing(c.listing_id()).await.unwrap();
        store.close_listing(c.listing_id()).await.unwrap();
        assert!(!store.listing(c.listing_id()).unwrap().open);
        assert!(store.close_listing(ListingId::new()).await.is_err());
    }
}
