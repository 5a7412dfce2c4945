//! The unread rule.
//!
//! A conversation counts as unread for a participant when their
//! participation is unread, or when it is still pending and they authored
//! the listing. The second clause keeps a fresh enquiry in front of the
//! listing's owner until they act on it, whatever the stored flag says.
//!
//! Stores must answer [`ConversationStore::unread_count`] with exactly this
//! rule; the functions here are the reference the in-memory store uses.
//!
//! [`ConversationStore::unread_count`]: crate::ConversationStore::unread_count

use crate::conversation::Conversation;
use crate::id::PersonId;
use crate::listing::Listing;

/// False for people who do not participate.
pub fn is_unread_for(conversation: &Conversation, listing: &Listing, person: PersonId) -> bool {
    let Ok(participation) = conversation.participation(person) else {
        return false;
    };
    !participation.is_read || (conversation.status().is_pending() && listing.is_author(person))
}

pub fn count_unread<'a, I>(conversations: I, person: PersonId) -> i64
where
    I: IntoIterator<Item = (&'a Conversation, &'a Listing)>,
{
    conversations
        .into_iter()
        .filter(|(c, l)| is_unread_for(c, l, person))
        .count() as i64
}
