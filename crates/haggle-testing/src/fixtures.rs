use std::sync::Arc;

use haggle_core::{
    Community, Conversation, ConversationService, InMemoryStore, JobQueue, Listing, ListingType,
    NewConversation, PersonId,
};

/// One listing, its author, someone answering it, and a community.
///
/// `offerer` and `requester` follow the listing type: on an offer the author
/// offers, on a request the author requests.
#[derive(Debug, Clone)]
pub struct Marketplace {
    pub store: Arc<InMemoryStore>,
    pub listing: Listing,
    pub community: Community,
    pub author: PersonId,
    pub responder: PersonId,
}

impl Marketplace {
    pub fn new(listing_type: ListingType) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let author = PersonId::new();
        let listing = Listing::new(author, listing_type);
        store.put_listing(listing.clone());
        Self {
            store,
            listing,
            community: Community::new(false),
            author,
            responder: PersonId::new(),
        }
    }

    pub fn offer() -> Self {
        Self::new(ListingType::Offer)
    }

    pub fn request() -> Self {
        Self::new(ListingType::Request)
    }

    pub fn offerer(&self) -> PersonId {
        if self.listing.is_offerer(self.author) {
            self.author
        } else {
            self.responder
        }
    }

    pub fn requester(&self) -> PersonId {
        if self.offerer() == self.author {
            self.responder
        } else {
            self.author
        }
    }

    pub fn service(&self, queue: Arc<dyn JobQueue>) -> ConversationService<InMemoryStore> {
        ConversationService::new(Arc::clone(&self.store), queue)
    }

    /// The responder writes to the author about the listing.
    pub fn enquiry(&self, content: &str) -> NewConversation {
        NewConversation {
            title: format!("About your {}", self.listing.listing_type),
            listing_id: self.listing.id,
            sender_id: self.responder,
            recipient_ids: vec![self.author],
            content: content.to_string(),
        }
    }

    /// Start the enquiry through `service`.
    ///
    /// # Panics
    ///
    /// Panics if the service rejects it.
    pub async fn open(&self, service: &ConversationService<InMemoryStore>) -> Conversation {
        service
            .start_conversation(self.enquiry("Is this still available?"))
            .await
            .unwrap()
    }
}
