//! The two sanctioned lifecycle transitions.
//!
//! ```text
//!                  accept_or_reject                confirm_or_cancel
//! pending ─────────────────────────► accepted ───────────────────────► confirmed
//!                                    rejected                          canceled
//!                                    free
//! ```
//!
//! The raw status is not checked against this diagram; any status may be
//! reached from any other. What the transitions add is the per-participation
//! bookkeeping and the decision to queue a follow-up effect. The flag
//! updates are idempotent; the effect is not, every call yields a fresh
//! [`Transition`].

use crate::conversation::Conversation;
use crate::effect::{EffectKind, TransitionEffect};
use crate::error::Result;
use crate::id::{CommunityId, ConversationId, PersonId};
use crate::listing::{Community, Listing};
use crate::status::{AcceptanceStatus, ClosingStatus, ConversationStatus};
use crate::store::Revision;

/// What a transition decided. Turned into a [`TransitionEffect`] once the
/// conversation has been saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub kind: EffectKind,
    pub conversation_id: ConversationId,
    pub acting_user_id: PersonId,
    pub community_id: CommunityId,
    pub from: ConversationStatus,
    pub to: ConversationStatus,
    pub close_listing: bool,
}

impl Transition {
    pub fn into_effect(self, revision: Revision) -> TransitionEffect {
        TransitionEffect {
            kind: self.kind,
            conversation_id: self.conversation_id,
            acting_user_id: self.acting_user_id,
            community_id: self.community_id,
            revision,
        }
    }
}

impl Conversation {
    /// Accept, reject, or give away for free.
    ///
    /// When the offerer acts, the offerer's participation becomes read and
    /// every other participation unread. With `close_listing` the listing's
    /// `open` flag is cleared.
    pub fn accept_or_reject(
        &mut self,
        listing: &mut Listing,
        actor: PersonId,
        community: &Community,
        close_listing: bool,
        status: AcceptanceStatus,
    ) -> Result<Transition> {
        self.ensure_listing(listing)?;
        let from = self.status();

        if self.offerer(listing) == Some(actor) {
            self.reset_read_state_for(actor);
        }
        if close_listing {
            listing.close();
        }
        self.assign_status(status.into());

        Ok(Transition {
            kind: EffectKind::AcceptedOrRejected,
            conversation_id: self.id(),
            acting_user_id: actor,
            community_id: community.id,
            from,
            to: self.status(),
            close_listing,
        })
    }

    /// Confirm or cancel the transaction.
    ///
    /// The actor must participate. An offerer's participation is marked
    /// read; unless `feedback_given`, the actor's feedback is recorded as
    /// skipped.
    pub fn confirm_or_cancel(
        &mut self,
        listing: &Listing,
        actor: PersonId,
        community: &Community,
        feedback_given: bool,
        status: ClosingStatus,
    ) -> Result<Transition> {
        self.ensure_listing(listing)?;
        let is_offerer = self.offerer(listing) == Some(actor);
        let from = self.status();

        let participation = self.participation_mut(actor)?;
        if is_offerer {
            participation.is_read = true;
        }
        if !feedback_given {
            participation.feedback_skipped = true;
        }
        self.assign_status(status.into());

        Ok(Transition {
            kind: EffectKind::ConfirmedOrCancelled,
            conversation_id: self.id(),
            acting_user_id: actor,
            community_id: community.id,
            from,
            to: self.status(),
            close_listing: false,
        })
    }

    fn reset_read_state_for(&mut self, actor: PersonId) {
        for person in self.participants().collect::<Vec<_>>() {
            if let Ok(p) = self.participation_mut(person) {
                p.is_read = person == actor;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ListingId;
    use crate::listing::ListingType;

    struct Fixture {
        conversation: Conversation,
        listing: Listing,
        community: Community,
        offerer: PersonId,
        requester: PersonId,
    }

    /// Offer listing by `offerer`; `requester` opened the conversation.
    fn fixture() -> Fixture {
        let offerer = PersonId::new();
        let requester = PersonId::new();
        let listing = Listing::new(offerer, ListingType::Offer);
        let mut conversation = Conversation::new("Borrow the drill", listing.id).unwrap();
        conversation
            .set_participants([(requester, true), (offerer, false)])
            .unwrap();
        Fixture {
            conversation,
            listing,
            community: Community::new(false),
            offerer,
            requester,
        }
    }

    #[test]
    fn offerer_accepting_resets_read_state() {
        let mut f = fixture();
        // start from the opposite of the expected outcome
        f.conversation.mark_read(f.requester).unwrap();

        let t = f
            .conversation
            .accept_or_reject(
                &mut f.listing,
                f.offerer,
                &f.community,
                false,
                AcceptanceStatus::Accepted,
            )
            .unwrap();

        assert!(f.conversation.is_read_by(f.offerer).unwrap());
        assert!(!f.conversation.is_read_by(f.requester).unwrap());
        assert_eq!(f.conversation.status(), ConversationStatus::Accepted);
        assert_eq!(t.from, ConversationStatus::Pending);
        assert_eq!(t.to, ConversationStatus::Accepted);
        assert_eq!(t.kind, EffectKind::AcceptedOrRejected);
        assert!(f.listing.open);
    }

    #[test]
    fn non_offerer_accepting_leaves_read_state() {
        let mut f = fixture();
        let before: Vec<bool> = f
            .conversation
            .participations()
            .iter()
            .map(|p| p.is_read)
            .collect();

        f.conversation
            .accept_or_reject(
                &mut f.listing,
                f.requester,
                &f.community,
                true,
                AcceptanceStatus::Rejected,
            )
            .unwrap();

        let after: Vec<bool> = f
            .conversation
            .participations()
            .iter()
            .map(|p| p.is_read)
            .collect();
        assert_eq!(before, after);
        assert!(!f.listing.open);
        assert_eq!(f.conversation.status(), ConversationStatus::Rejected);
    }

    #[test]
    fn accept_or_reject_is_idempotent_on_flags() {
        let mut f = fixture();
        for _ in 0..3 {
            f.conversation
                .accept_or_reject(
                    &mut f.listing,
                    f.offerer,
                    &f.community,
                    true,
                    AcceptanceStatus::Free,
                )
                .unwrap();
        }
        assert!(f.conversation.is_read_by(f.offerer).unwrap());
        assert!(!f.conversation.is_read_by(f.requester).unwrap());
        assert!(!f.listing.open);
        assert_eq!(f.conversation.status(), ConversationStatus::Free);
    }

    #[test]
    fn confirm_without_feedback_skips_it() {
        let mut f = fixture();
        let t = f
            .conversation
            .confirm_or_cancel(
                &f.listing,
                f.requester,
                &f.community,
                false,
                ClosingStatus::Confirmed,
            )
            .unwrap();

        assert!(f.conversation.feedback_skipped_by(f.requester).unwrap());
        assert!(!f.conversation.feedback_skipped_by(f.offerer).unwrap());
        assert_eq!(t.kind, EffectKind::ConfirmedOrCancelled);
        assert_eq!(f.conversation.status(), ConversationStatus::Confirmed);
    }

    #[test]
    fn offerer_confirming_marks_own_participation_read() {
        let mut f = fixture();
        assert!(!f.conversation.is_read_by(f.offerer).unwrap());

        f.conversation
            .confirm_or_cancel(
                &f.listing,
                f.offerer,
                &f.community,
                true,
                ClosingStatus::Canceled,
            )
            .unwrap();

        assert!(f.conversation.is_read_by(f.offerer).unwrap());
        assert!(!f.conversation.feedback_skipped_by(f.offerer).unwrap());
        assert_eq!(f.conversation.status(), ConversationStatus::Canceled);
    }

    #[test]
    fn confirm_by_stranger_is_not_found_and_changes_nothing() {
        let mut f = fixture();
        let before = f.conversation.clone();
        let err = f
            .conversation
            .confirm_or_cancel(
                &f.listing,
                PersonId::new(),
                &f.community,
                false,
                ClosingStatus::Confirmed,
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(f.conversation, before);
    }

    #[test]
    fn foreign_listing_is_rejected() {
        let mut f = fixture();
        let mut other = Listing::new(f.offerer, ListingType::Offer);
        other.id = ListingId::new();
        let err = f
            .conversation
            .accept_or_reject(
                &mut other,
                f.offerer,
                &f.community,
                true,
                AcceptanceStatus::Accepted,
            )
            .unwrap_err();
        assert!(err.is_validation());
        assert!(other.open);
    }

    #[test]
    fn transition_becomes_effect_at_revision() {
        let mut f = fixture();
        let t = f
            .conversation
            .accept_or_reject(
                &mut f.listing,
                f.offerer,
                &f.community,
                false,
                AcceptanceStatus::Accepted,
            )
            .unwrap();
        let effect = t.into_effect(Revision(3));
        assert_eq!(effect.revision, Revision(3));
        assert_eq!(effect.acting_user_id, f.offerer);
        assert_eq!(effect.community_id, f.community.id);
        assert_eq!(effect.conversation_id, f.conversation.id());
    }
}
