//! The conversation aggregate.
//!
//! A [`Conversation`] owns its participations and messages. Every mutation
//! goes through a method here so the invariants hold at all times:
//!
//! - the title is 1..=120 characters,
//! - the status is one of the six known values,
//! - a person has at most one participation,
//! - message sequences strictly increase in append order.
//!
//! Listing- and community-dependent queries take the collaborator as an
//! argument; the aggregate only stores the listing id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::warn;

use crate::error::{HaggleError, Result};
use crate::id::{ConversationId, ListingId, MessageId, PersonId};
use crate::listing::{Community, Listing, ListingType};
use crate::message::{Message, NewMessage};
use crate::participation::Participation;
use crate::status::ConversationStatus;
use crate::store::Revision;

pub const MAX_TITLE_CHARS: usize = 120;

/// Most conversations are between exactly two people.
pub type Participations = SmallVec<[Participation; 2]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    id: ConversationId,
    title: String,
    status: ConversationStatus,
    listing_id: ListingId,
    participations: Participations,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: Revision,
}

/// Plain-data form of a conversation, for stores and wire formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub title: String,
    pub status: ConversationStatus,
    pub listing_id: ListingId,
    pub participations: Vec<Participation>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: Revision,
}

fn validate_title(title: &str) -> Result<()> {
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_CHARS {
        return Err(HaggleError::validation(format!(
            "title must be 1..={} characters, got {}",
            MAX_TITLE_CHARS, len
        )));
    }
    Ok(())
}

fn missing_participation(id: ConversationId, person: PersonId) -> HaggleError {
    HaggleError::not_found("participation", format!("{} in conversation {}", person, id))
}

impl Conversation {
    /// A new pending conversation about `listing_id`, with no participants
    /// and no messages yet.
    pub fn new(title: impl Into<String>, listing_id: ListingId) -> Result<Self> {
        let title = title.into();
        validate_title(&title)?;
        let now = Utc::now();
        Ok(Self {
            id: ConversationId::new(),
            title,
            status: ConversationStatus::Pending,
            listing_id,
            participations: SmallVec::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: Revision::NONE,
        })
    }

    /// Rebuild an aggregate from stored data, re-checking every invariant.
    pub fn restore(snapshot: ConversationSnapshot) -> Result<Self> {
        validate_title(&snapshot.title)?;

        let mut seen: SmallVec<[PersonId; 4]> = SmallVec::new();
        for p in &snapshot.participations {
            if seen.contains(&p.person_id) {
                return Err(HaggleError::validation(format!(
                    "duplicate participation for person {}",
                    p.person_id
                )));
            }
            seen.push(p.person_id);
        }

        let mut messages = snapshot.messages;
        messages.sort_by_key(|m| m.sequence);
        if messages.windows(2).any(|w| w[0].sequence == w[1].sequence) {
            return Err(HaggleError::validation("duplicate message sequence"));
        }

        Ok(Self {
            id: snapshot.id,
            title: snapshot.title,
            status: snapshot.status,
            listing_id: snapshot.listing_id,
            participations: snapshot.participations.into_iter().collect(),
            messages,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            revision: snapshot.revision,
        })
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            id: self.id,
            title: self.title.clone(),
            status: self.status,
            listing_id: self.listing_id,
            participations: self.participations.to_vec(),
            messages: self.messages.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            revision: self.revision,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn listing_id(&self) -> ListingId {
        self.listing_id
    }

    pub fn participations(&self) -> &[Participation] {
        &self.participations
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn participants(&self) -> impl Iterator<Item = PersonId> + '_ {
        self.participations.iter().map(|p| p.person_id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub(crate) fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        validate_title(&title)?;
        self.title = title;
        self.touch();
        Ok(())
    }

    /// Raw status assignment. Only membership is checked; no transition
    /// rules and no side effects. Prefer the lifecycle operations.
    pub fn set_status(&mut self, status: &str) -> Result<()> {
        let status: ConversationStatus = status.parse()?;
        self.assign_status(status);
        Ok(())
    }

    pub(crate) fn assign_status(&mut self, status: ConversationStatus) {
        self.status = status;
        self.touch();
    }

    /// Create one participation per `(person, is_sender)` entry.
    ///
    /// Senders start read with `last_sent_at` stamped; everyone else starts
    /// unread with `last_received_at` stamped. The whole batch is rejected if
    /// it is empty or names a person twice or a person who already
    /// participates.
    pub fn set_participants<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (PersonId, bool)>,
    {
        let entries: SmallVec<[(PersonId, bool); 2]> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(HaggleError::validation("participant list is empty"));
        }

        for (i, (person, _)) in entries.iter().enumerate() {
            let repeated = entries[..i].iter().any(|(p, _)| p == person);
            if repeated || self.is_participant(*person) {
                return Err(HaggleError::validation(format!(
                    "person {} already participates in conversation {}",
                    person, self.id
                )));
            }
        }

        let now = Utc::now();
        self.participations
            .extend(entries.into_iter().map(|(person, is_sender)| {
                if is_sender {
                    Participation::sender(person, now)
                } else {
                    Participation::receiver(person, now)
                }
            }));
        self.touch();
        Ok(())
    }

    /// Append a message. Status and read state are left alone; see
    /// [`Conversation::record_delivery`].
    pub fn add_message(&mut self, new: NewMessage) -> &Message {
        let now = Utc::now();
        let (sequence, created_at) = match self.messages.last() {
            Some(last) => (last.sequence + 1, now.max(last.created_at)),
            None => (1, now),
        };

        self.messages.push(Message {
            id: MessageId::new(),
            conversation_id: self.id,
            sender_id: new.sender_id,
            content: new.content,
            sequence,
            created_at,
        });
        self.touch();

        &self.messages[self.messages.len() - 1]
    }

    /// Stamp a delivery: the sender has read the thread, everyone else has
    /// something new.
    pub fn record_delivery(&mut self, sender: PersonId, at: DateTime<Utc>) -> Result<()> {
        if !self.is_participant(sender) {
            return Err(missing_participation(self.id, sender));
        }
        for p in self.participations.iter_mut() {
            if p.person_id == sender {
                p.stamp_sent(at);
            } else {
                p.stamp_received(at);
            }
        }
        self.touch();
        Ok(())
    }

    /// The most recent message, whoever sent it.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent message `person` received (`received == true`: sent
    /// by someone else) or sent (`received == false`).
    pub fn last_message_for(&self, person: PersonId, received: bool) -> Option<&Message> {
        self.last_message_from(person, received, 0)
    }

    /// Like [`Conversation::last_message_for`], but skipping the newest
    /// `offset_from_end` messages before the search starts.
    pub fn last_message_from(
        &self,
        person: PersonId,
        received: bool,
        offset_from_end: usize,
    ) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .skip(offset_from_end)
            .find(|m| (m.sender_id == person) != received)
    }

    /// Everyone except `sender`, in participation order.
    pub fn recipients(&self, sender: PersonId) -> Vec<PersonId> {
        self.participants().filter(|p| *p != sender).collect()
    }

    /// The first participant other than `person`.
    ///
    /// Only meaningful for two-party conversations. With more participants
    /// this is just the first counterpart; use [`Conversation::recipients`]
    /// for the full set.
    pub fn other_party(&self, person: PersonId) -> Option<PersonId> {
        if self.participations.len() > 2 {
            warn!(
                conversation_id = %self.id,
                participants = self.participations.len(),
                "other_party on a multi-party conversation, returning first counterpart"
            );
        }
        self.participants().find(|p| *p != person)
    }

    pub fn is_participant(&self, person: PersonId) -> bool {
        self.participations.iter().any(|p| p.person_id == person)
    }

    pub fn participation(&self, person: PersonId) -> Result<&Participation> {
        self.participations
            .iter()
            .find(|p| p.person_id == person)
            .ok_or_else(|| missing_participation(self.id, person))
    }

    pub(crate) fn participation_mut(&mut self, person: PersonId) -> Result<&mut Participation> {
        let id = self.id;
        self.participations
            .iter_mut()
            .find(|p| p.person_id == person)
            .ok_or_else(|| missing_participation(id, person))
    }

    pub fn is_read_by(&self, person: PersonId) -> Result<bool> {
        Ok(self.participation(person)?.is_read)
    }

    pub fn mark_read(&mut self, person: PersonId) -> Result<()> {
        self.participation_mut(person)?.is_read = true;
        self.touch();
        Ok(())
    }

    /// A conversation on a request resolves an offer, and vice versa.
    pub fn discussion_type(&self, listing: &Listing) -> ListingType {
        listing.listing_type.inverse()
    }

    /// True once every participant has given or skipped feedback.
    pub fn can_be_cancelled(&self) -> bool {
        self.participations.iter().all(|p| !p.feedback_can_be_given())
    }

    /// Same predicate as [`Conversation::can_be_cancelled`].
    pub fn has_feedback_from_all_participants(&self) -> bool {
        self.can_be_cancelled()
    }

    pub fn has_feedback_from(&self, person: PersonId) -> Result<bool> {
        Ok(self.participation(person)?.has_feedback())
    }

    pub fn feedback_skipped_by(&self, person: PersonId) -> Result<bool> {
        Ok(self.participation(person)?.feedback_skipped)
    }

    pub fn give_feedback(&mut self, person: PersonId) -> Result<()> {
        self.participation_mut(person)?.feedback_given = true;
        self.touch();
        Ok(())
    }

    pub fn skip_feedback(&mut self, person: PersonId) -> Result<()> {
        self.participation_mut(person)?.feedback_skipped = true;
        self.touch();
        Ok(())
    }

    pub fn offerer(&self, listing: &Listing) -> Option<PersonId> {
        self.participants().find(|p| listing.is_offerer(*p))
    }

    pub fn requester(&self, listing: &Listing) -> Option<PersonId> {
        self.participants().find(|p| listing.is_requester(*p))
    }

    pub fn requires_payment(&self, community: &Community) -> bool {
        community.payments_in_use
    }

    pub(crate) fn ensure_listing(&self, listing: &Listing) -> Result<()> {
        if listing.id != self.listing_id {
            return Err(HaggleError::validation(format!(
                "listing {} does not belong to conversation {}",
                listing.id, self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_party() -> (Conversation, PersonId, PersonId) {
        let a = PersonId::new();
        let b = PersonId::new();
        let mut c = Conversation::new("Bike for a week", ListingId::new()).unwrap();
        c.set_participants([(a, true), (b, false)]).unwrap();
        (c, a, b)
    }

    #[test]
    fn title_bounds_are_enforced() {
        let listing = ListingId::new();
        assert!(Conversation::new("x", listing).is_ok());
        assert!(Conversation::new("x".repeat(120), listing).is_ok());
        assert!(Conversation::new("", listing).unwrap_err().is_validation());
        assert!(Conversation::new("x".repeat(121), listing)
            .unwrap_err()
            .is_validation());
        // characters, not bytes
        assert!(Conversation::new("é".repeat(120), listing).is_ok());
    }

    #[test]
    fn new_conversations_start_pending() {
        let (c, _, _) = two_party();
        assert_eq!(c.status(), ConversationStatus::Pending);
        assert!(c.revision().is_none());
    }

    #[test]
    fn set_status_rejects_unknown_values() {
        let (mut c, _, _) = two_party();
        assert!(c.set_status("archived").unwrap_err().is_validation());
        assert_eq!(c.status(), ConversationStatus::Pending);

        c.set_status("free").unwrap();
        assert_eq!(c.status(), ConversationStatus::Free);
    }

    #[test]
    fn participants_get_read_state_from_sender_flag() {
        let (c, a, b) = two_party();
        assert!(c.is_read_by(a).unwrap());
        assert!(!c.is_read_by(b).unwrap());
        assert!(c.participation(a).unwrap().last_sent_at.is_some());
        assert!(c.participation(b).unwrap().last_received_at.is_some());
    }

    #[test]
    fn duplicate_participants_are_rejected_without_partial_writes() {
        let (mut c, a, _) = two_party();
        let newcomer = PersonId::new();
        let err = c.set_participants([(newcomer, false), (a, false)]).unwrap_err();
        assert!(err.is_validation());
        assert!(!c.is_participant(newcomer));
        assert_eq!(c.participations().len(), 2);

        let mut fresh = Conversation::new("t", ListingId::new()).unwrap();
        assert!(fresh
            .set_participants([(newcomer, true), (newcomer, false)])
            .is_err());
        assert!(fresh.set_participants(Vec::new()).is_err());
    }

    #[test]
    fn lookups_for_strangers_are_not_found() {
        let (mut c, _, _) = two_party();
        let stranger = PersonId::new();
        assert!(c.is_read_by(stranger).unwrap_err().is_not_found());
        assert!(c.has_feedback_from(stranger).unwrap_err().is_not_found());
        assert!(c.feedback_skipped_by(stranger).unwrap_err().is_not_found());
        assert!(c.mark_read(stranger).unwrap_err().is_not_found());
        assert!(c
            .record_delivery(stranger, Utc::now())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn last_message_walks_backwards_by_sender() {
        let (mut c, a, b) = two_party();
        let m1 = c.add_message(NewMessage::new(a, "hi")).id;
        let m2 = c.add_message(NewMessage::new(b, "hello")).id;
        let m3 = c.add_message(NewMessage::new(a, "still free?")).id;

        assert_eq!(c.last_message().map(|m| m.id), Some(m3));
        assert_eq!(c.last_message_for(a, true).map(|m| m.id), Some(m2));
        assert_eq!(c.last_message_for(a, false).map(|m| m.id), Some(m3));
        assert_eq!(c.last_message_for(b, true).map(|m| m.id), Some(m3));
        assert_eq!(c.last_message_from(a, false, 1).map(|m| m.id), Some(m1));
        assert!(c.last_message_from(a, true, 2).is_none());
        assert!(c.last_message_from(a, true, 10).is_none());
    }

    #[test]
    fn message_sequences_increase() {
        let (mut c, a, b) = two_party();
        for i in 0..5 {
            let sender = if i % 2 == 0 { a } else { b };
            c.add_message(NewMessage::new(sender, format!("m{i}")));
        }
        let seqs: Vec<i32> = c.messages().iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert!(c
            .messages()
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn adding_a_message_leaves_read_state_alone() {
        let (mut c, a, b) = two_party();
        c.add_message(NewMessage::new(b, "reply"));
        assert!(c.is_read_by(a).unwrap());
        assert!(!c.is_read_by(b).unwrap());

        let at = Utc::now();
        c.record_delivery(b, at).unwrap();
        assert!(!c.is_read_by(a).unwrap());
        assert!(c.is_read_by(b).unwrap());
        assert_eq!(c.participation(a).unwrap().last_received_at, Some(at));
        assert_eq!(c.participation(b).unwrap().last_sent_at, Some(at));
    }

    #[test]
    fn other_party_and_recipients() {
        let (mut c, a, b) = two_party();
        assert_eq!(c.other_party(a), Some(b));
        assert_eq!(c.other_party(b), Some(a));
        assert_eq!(c.recipients(a), vec![b]);

        let third = PersonId::new();
        c.set_participants([(third, false)]).unwrap();
        assert_eq!(c.other_party(a), Some(b));
        assert_eq!(c.recipients(a), vec![b, third]);
    }

    #[test]
    fn feedback_predicates() {
        let (mut c, a, b) = two_party();
        assert!(!c.can_be_cancelled());

        c.give_feedback(a).unwrap();
        assert!(!c.can_be_cancelled());
        c.skip_feedback(b).unwrap();
        assert!(c.can_be_cancelled());
        assert!(c.has_feedback_from_all_participants());
        assert!(c.has_feedback_from(a).unwrap());
        assert!(c.feedback_skipped_by(b).unwrap());
        assert!(!c.feedback_skipped_by(a).unwrap());
    }

    #[test]
    fn roles_come_from_the_listing() {
        let (c, a, b) = two_party();
        let mut listing = Listing::new(a, ListingType::Offer);
        listing.id = c.listing_id();

        assert_eq!(c.offerer(&listing), Some(a));
        assert_eq!(c.requester(&listing), Some(b));
        assert_eq!(c.discussion_type(&listing), ListingType::Request);

        listing.listing_type = ListingType::Request;
        assert_eq!(c.offerer(&listing), Some(b));
        assert_eq!(c.requester(&listing), Some(a));
        assert_eq!(c.discussion_type(&listing), ListingType::Offer);

        assert!(c.requires_payment(&Community::new(true)));
        assert!(!c.requires_payment(&Community::new(false)));
    }

    #[test]
    fn restore_rechecks_invariants() {
        let (mut c, a, _) = two_party();
        c.add_message(NewMessage::new(a, "one"));
        let snapshot = c.snapshot();
        assert_eq!(Conversation::restore(snapshot.clone()).unwrap(), c);

        let mut dup = snapshot.clone();
        dup.participations.push(dup.participations[0].clone());
        assert!(Conversation::restore(dup).unwrap_err().is_validation());

        let mut bad_title = snapshot;
        bad_title.title = String::new();
        assert!(Conversation::restore(bad_title).is_err());
    }
}
