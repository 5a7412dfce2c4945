//! Deferred effects handed to the job queue.
//!
//! Job descriptors are plain serde structs. Workers decode them through
//! [`CommandRegistry::with_haggle_effects`](crate::CommandRegistry::with_haggle_effects).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auto_serialize;
use crate::core::{Command, ExecutionMode, JobSpec};
use crate::id::{CommunityId, ConversationId, MessageId, PersonId};
use crate::store::Revision;

pub const ACCEPTED_OR_REJECTED: &str = "accepted_or_rejected";
pub const CONFIRMED_OR_CANCELLED: &str = "confirmed_or_cancelled";
pub const NEW_MESSAGE_NOTIFICATION: &str = "new_message_notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    AcceptedOrRejected,
    ConfirmedOrCancelled,
}

impl EffectKind {
    pub fn job_type(&self) -> &'static str {
        match self {
            EffectKind::AcceptedOrRejected => ACCEPTED_OR_REJECTED,
            EffectKind::ConfirmedOrCancelled => CONFIRMED_OR_CANCELLED,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_type())
    }
}

/// Follow-up work for a lifecycle transition.
///
/// `revision` is the conversation revision the transition was saved at, so
/// the idempotency key is stable across retries of the same handoff and
/// distinct for every new transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEffect {
    pub kind: EffectKind,
    pub conversation_id: ConversationId,
    pub acting_user_id: PersonId,
    pub community_id: CommunityId,
    pub revision: Revision,
}

impl TransitionEffect {
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:r{}",
            self.kind.job_type(),
            self.conversation_id,
            self.revision.value()
        )
    }
}

impl Command for TransitionEffect {
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Background
    }

    fn job_spec(&self) -> Option<JobSpec> {
        Some(
            JobSpec::new(self.kind.job_type())
                .with_idempotency_key(self.idempotency_key())
                .with_reference_id(self.conversation_id.into_uuid())
                .with_container_id(self.community_id.into_uuid()),
        )
    }

    auto_serialize!();
}

/// Mail one recipient about the latest message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageNotification {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub recipient_id: PersonId,
    pub community_id: CommunityId,
}

impl Command for NewMessageNotification {
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Background
    }

    fn job_spec(&self) -> Option<JobSpec> {
        Some(
            JobSpec::new(NEW_MESSAGE_NOTIFICATION)
                .with_idempotency_key(format!(
                    "{}:{}:{}",
                    NEW_MESSAGE_NOTIFICATION, self.message_id, self.recipient_id
                ))
                .with_reference_id(self.conversation_id.into_uuid())
                .with_container_id(self.community_id.into_uuid()),
        )
    }

    auto_serialize!();
}
