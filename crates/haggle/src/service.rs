//! The entry point callers use.
//!
//! Every mutation of one conversation runs under that conversation's
//! `tokio::sync::Mutex`, taken from a `DashMap` lock table, so two
//! transitions on the same thread never interleave their flag writes.
//! Writers in other processes are caught by the store's revision check and
//! surface as [`HaggleError::Conflict`]. Different conversations never
//! contend.
//!
//! Lifecycle transitions persist first and enqueue their effect second. A
//! failed enqueue is logged and reported as `job_id: None`; the transition
//! itself stands.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::conversation::Conversation;
use crate::dispatch::{EffectDispatcher, JobQueue};
use crate::effect::{NewMessageNotification, TransitionEffect};
use crate::error::{HaggleError, Result};
use crate::id::{ConversationId, ListingId, PersonId};
use crate::listing::{Community, Listing};
use crate::message::{Message, NewMessage};
use crate::notify::{NotificationPreferences, NotifyEveryone};
use crate::status::{AcceptanceStatus, ClosingStatus};
use crate::store::{ConversationStore, ListingStore, Revision};
use crate::transition::Transition;

/// Opening a conversation: the sender's first message to one or more
/// recipients about a listing.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub title: String,
    pub listing_id: ListingId,
    pub sender_id: PersonId,
    pub recipient_ids: Vec<PersonId>,
    pub content: String,
}

/// Result of a lifecycle transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The conversation as saved.
    pub conversation: Conversation,
    pub revision: Revision,
    /// `None` when the effect could not be handed to the queue.
    pub job_id: Option<Uuid>,
    /// True only when closing was asked for and the listing store took it.
    pub listing_closed: bool,
}

/// Holds one conversation's lock. On drop the lock is released and its
/// table entry removed if no other caller holds or waits on it.
struct LockLease<'a> {
    id: ConversationId,
    locks: &'a DashMap<ConversationId, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table's own reference left.
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct ConversationService<S> {
    store: Arc<S>,
    dispatcher: EffectDispatcher,
    preferences: Arc<dyn NotificationPreferences>,
    locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl<S> ConversationService<S>
where
    S: ConversationStore + ListingStore,
{
    pub fn new(store: Arc<S>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            dispatcher: EffectDispatcher::new(queue, ServiceConfig::default()),
            preferences: Arc::new(NotifyEveryone),
            locks: DashMap::new(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.dispatcher = EffectDispatcher::new(self.dispatcher.queue(), config);
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn NotificationPreferences>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        self.dispatcher.config()
    }

    async fn lock(&self, id: ConversationId) -> LockLease<'_> {
        // Cloned under the shard lock, so `remove_if` in a concurrent drop
        // sees this reference.
        let lock = self.locks.entry(id).or_default().value().clone();
        LockLease {
            id,
            locks: &self.locks,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_table_len(&self) -> usize {
        self.locks.len()
    }

    async fn load_required(&self, id: ConversationId) -> Result<Conversation> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| HaggleError::not_found("conversation", id))
    }

    async fn listing(&self, id: ListingId) -> Result<Listing> {
        self.store
            .load_listing(id)
            .await?
            .ok_or_else(|| HaggleError::not_found("listing", id))
    }

    /// Load, apply `f`, save against the loaded revision.
    async fn mutate<T, F>(&self, id: ConversationId, f: F) -> Result<(Conversation, T)>
    where
        F: FnOnce(&mut Conversation) -> Result<T>,
    {
        let _lease = self.lock(id).await;

        let mut conversation = self.load_required(id).await?;
        let expected = conversation.revision();
        let out = f(&mut conversation)?;
        let revision = self.store.save(&conversation, expected).await?;
        conversation.set_revision(revision);
        Ok((conversation, out))
    }

    /// Create a pending conversation with its opening message.
    ///
    /// The sender's participation starts read, every recipient's unread.
    #[instrument(
        name = "haggle.start_conversation",
        skip(self, new),
        fields(listing_id = %new.listing_id, sender_id = %new.sender_id),
        err
    )]
    pub async fn start_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.listing(new.listing_id).await?;

        let mut conversation = Conversation::new(new.title, new.listing_id)?;
        let entries = std::iter::once((new.sender_id, true))
            .chain(new.recipient_ids.into_iter().map(|r| (r, false)));
        conversation.set_participants(entries)?;
        conversation.add_message(NewMessage::new(new.sender_id, new.content));

        let revision = self.store.insert(&conversation).await?;
        conversation.set_revision(revision);
        info!(conversation_id = %conversation.id(), "conversation started");
        Ok(conversation)
    }

    /// Append a message from a participant and flip everyone else to
    /// unread.
    #[instrument(name = "haggle.reply", skip(self, content), err)]
    pub async fn reply(
        &self,
        id: ConversationId,
        sender: PersonId,
        content: String,
    ) -> Result<Message> {
        let (_, message) = self
            .mutate(id, |c| {
                c.participation(sender)?;
                let message = c.add_message(NewMessage::new(sender, content)).clone();
                c.record_delivery(sender, message.created_at)?;
                Ok(message)
            })
            .await?;
        debug!(message_id = %message.id, sequence = message.sequence, "reply stored");
        Ok(message)
    }

    #[instrument(name = "haggle.mark_read", skip(self), err)]
    pub async fn mark_read(&self, id: ConversationId, person: PersonId) -> Result<Conversation> {
        let (conversation, ()) = self.mutate(id, |c| c.mark_read(person)).await?;
        Ok(conversation)
    }

    #[instrument(name = "haggle.give_feedback", skip(self), err)]
    pub async fn give_feedback(&self, id: ConversationId, person: PersonId) -> Result<Conversation> {
        let (conversation, ()) = self.mutate(id, |c| c.give_feedback(person)).await?;
        Ok(conversation)
    }

    #[instrument(name = "haggle.skip_feedback", skip(self), err)]
    pub async fn skip_feedback(&self, id: ConversationId, person: PersonId) -> Result<Conversation> {
        let (conversation, ()) = self.mutate(id, |c| c.skip_feedback(person)).await?;
        Ok(conversation)
    }

    /// Accept, reject, or give away, then queue the follow-up.
    ///
    /// The listing is closed after the conversation is saved when
    /// `close_listing` is set. A failed close is logged and reported as
    /// `listing_closed: false`; the effect is queued either way.
    #[instrument(name = "haggle.accept_or_reject", skip(self, community), fields(community_id = %community.id), err)]
    pub async fn accept_or_reject(
        &self,
        id: ConversationId,
        actor: PersonId,
        community: &Community,
        close_listing: bool,
        status: AcceptanceStatus,
    ) -> Result<TransitionOutcome> {
        let _lease = self.lock(id).await;

        let mut conversation = self.load_required(id).await?;
        let mut listing = self.listing(conversation.listing_id()).await?;
        let expected = conversation.revision();

        let transition =
            conversation.accept_or_reject(&mut listing, actor, community, close_listing, status)?;
        let revision = self.store.save(&conversation, expected).await?;
        conversation.set_revision(revision);

        // The transition is committed; a failed close must not stop its effect.
        let listing_closed = transition.close_listing
            && match self.store.close_listing(listing.id).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        conversation_id = %id,
                        listing_id = %listing.id,
                        error = %e,
                        "transition saved but listing was not closed"
                    );
                    false
                }
            };

        Ok(self.finish(conversation, transition, listing_closed).await)
    }

    /// Confirm or cancel, then queue the follow-up.
    #[instrument(name = "haggle.confirm_or_cancel", skip(self, community), fields(community_id = %community.id), err)]
    pub async fn confirm_or_cancel(
        &self,
        id: ConversationId,
        actor: PersonId,
        community: &Community,
        feedback_given: bool,
        status: ClosingStatus,
    ) -> Result<TransitionOutcome> {
        let _lease = self.lock(id).await;

        let mut conversation = self.load_required(id).await?;
        let listing = self.listing(conversation.listing_id()).await?;
        let expected = conversation.revision();

        let transition =
            conversation.confirm_or_cancel(&listing, actor, community, feedback_given, status)?;
        let revision = self.store.save(&conversation, expected).await?;
        conversation.set_revision(revision);

        Ok(self.finish(conversation, transition, false).await)
    }

    async fn finish(
        &self,
        conversation: Conversation,
        transition: Transition,
        listing_closed: bool,
    ) -> TransitionOutcome {
        info!(
            conversation_id = %transition.conversation_id,
            acting_user_id = %transition.acting_user_id,
            from = %transition.from,
            to = %transition.to,
            "conversation transitioned"
        );

        let revision = conversation.revision();
        let effect: TransitionEffect = transition.into_effect(revision);
        let job_id = match self.dispatcher.dispatch(&effect).await {
            Ok(job_id) => Some(job_id),
            Err(e) => {
                error!(
                    conversation_id = %effect.conversation_id,
                    idempotency_key = %effect.idempotency_key(),
                    error = %e,
                    "transition saved but effect was not enqueued"
                );
                None
            }
        };

        TransitionOutcome {
            conversation,
            revision,
            job_id,
            listing_closed,
        }
    }

    /// Queue a new-message notification for every recipient of the latest
    /// message who wants one. Returns the people notified.
    ///
    /// Preferences are looked up concurrently. A recipient whose lookup or
    /// enqueue fails is logged and left out of the result; the others still
    /// go through.
    #[instrument(name = "haggle.notify_participants", skip(self, community), fields(community_id = %community.id), err)]
    pub async fn notify_participants(
        &self,
        id: ConversationId,
        community: &Community,
    ) -> Result<Vec<PersonId>> {
        let conversation = self.load_required(id).await?;
        let Some(last) = conversation.last_message() else {
            return Ok(Vec::new());
        };

        let recipients = conversation.recipients(last.sender_id);
        let wants = join_all(
            recipients
                .iter()
                .map(|r| self.preferences.receives_new_message_notifications(*r)),
        )
        .await;

        let mut notified = Vec::new();
        for (recipient, wants) in recipients.into_iter().zip(wants) {
            match wants {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(recipient_id = %recipient, error = %e, "preference lookup failed");
                    continue;
                }
            }

            let job = NewMessageNotification {
                conversation_id: id,
                message_id: last.id,
                recipient_id: recipient,
                community_id: community.id,
            };
            match self.dispatcher.dispatch(&job).await {
                Ok(_) => notified.push(recipient),
                Err(e) => {
                    error!(recipient_id = %recipient, error = %e, "notification not enqueued")
                }
            }
        }
        Ok(notified)
    }

    #[instrument(name = "haggle.unread_count", skip(self), err)]
    pub async fn unread_count(&self, person: PersonId) -> Result<i64> {
        Ok(self.store.unread_count(person).await?)
    }

    pub async fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.load_required(id).await
    }

    pub async fn conversations_for(&self, person: PersonId) -> Result<Vec<Conversation>> {
        Ok(self.store.conversations_for(person).await?)
    }

    /// Delete the conversation with its messages and participations.
    #[instrument(name = "haggle.delete_conversation", skip(self), err)]
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let lease = self.lock(id).await;
        let deleted = self.store.delete(id).await?;
        drop(lease);
        if !deleted {
            return Err(HaggleError::not_found("conversation", id));
        }
        info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }
}
