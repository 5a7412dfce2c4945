//! Worker-side job interfaces.
//!
//! Haggle owns interfaces only. Polling cadence, retry backoff and
//! concurrency limits belong to whoever runs the worker.
//!
//! ```ignore
//! let registry = CommandRegistry::with_haggle_effects();
//!
//! loop {
//!     for job in store.claim_ready("worker-1", 10).await? {
//!         match registry.deserialize(&job) {
//!             Ok(cmd) => {
//!                 if let Some(effect) = cmd.as_any().downcast_ref::<TransitionEffect>() {
//!                     mailer.send_transition_mail(effect).await?;
//!                 }
//!                 store.mark_succeeded(job.id).await?;
//!             }
//!             Err(e) => store.mark_failed(job.id, &e.to_string(), e.failure_kind()).await?,
//!         }
//!     }
//!     tokio::time::sleep(poll_interval).await;
//! }
//! ```

use std::collections::HashMap;

use anyhow::Result;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::core::{AnyCommand, Command};
use crate::effect::{
    NewMessageNotification, TransitionEffect, ACCEPTED_OR_REJECTED, CONFIRMED_OR_CANCELLED,
    NEW_MESSAGE_NOTIFICATION,
};

/// Claiming jobs from a persistent store.
///
/// The store decides what "ready" means (run_at reached, lease expired,
/// retry delay elapsed). Implementations should claim atomically, e.g. with
/// `FOR UPDATE SKIP LOCKED`.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    /// Retryable failures go back to pending with a backoff until the retry
    /// budget is spent; non-retryable ones are dead-lettered at once.
    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: FailureKind) -> Result<()>;

    /// Extend the lease of a long-running job.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient: network timeout, rate limit, mail server down.
    Retryable,
    /// Permanent: bad payload, unknown job type.
    NonRetryable,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub version: i32,
    /// 1-based.
    pub attempt: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializationError {
    #[error("unknown command type: {0}")]
    UnknownCommandType(String),

    #[error("unsupported version {version} for command {job_type}")]
    UnsupportedVersion { job_type: String, version: i32 },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] anyhow::Error),
}

impl DeserializationError {
    /// None of these get better by retrying.
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::NonRetryable
    }
}

type DeserializeFn = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn AnyCommand>> + Send + Sync>;

struct CommandDeserializer {
    supported_versions: Vec<i32>,
    deserialize: DeserializeFn,
}

/// Maps job types back to commands, with payload version checks.
#[derive(Default)]
pub struct CommandRegistry {
    deserializers: HashMap<&'static str, CommandDeserializer>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that decodes every job this crate enqueues.
    pub fn with_haggle_effects() -> Self {
        let mut registry = Self::new();
        registry.register::<TransitionEffect>(ACCEPTED_OR_REJECTED, vec![1]);
        registry.register::<TransitionEffect>(CONFIRMED_OR_CANCELLED, vec![1]);
        registry.register::<NewMessageNotification>(NEW_MESSAGE_NOTIFICATION, vec![1]);
        registry
    }

    /// # Panics
    ///
    /// Panics if `job_type` is already registered.
    pub fn register<C>(&mut self, job_type: &'static str, supported_versions: Vec<i32>)
    where
        C: Command + DeserializeOwned + 'static,
    {
        if self.deserializers.contains_key(job_type) {
            panic!("deserializer already registered for job type: {}", job_type);
        }

        let deserialize: DeserializeFn = Box::new(|payload: &serde_json::Value| {
            let command: C = serde_json::from_value(payload.clone())
                .map_err(|e| anyhow::anyhow!("JSON deserialization failed: {}", e))?;
            Ok(Box::new(command) as Box<dyn AnyCommand>)
        });

        self.deserializers.insert(
            job_type,
            CommandDeserializer {
                supported_versions,
                deserialize,
            },
        );
    }

    pub fn deserialize(
        &self,
        job: &ClaimedJob,
    ) -> Result<Box<dyn AnyCommand>, DeserializationError> {
        let entry = self
            .deserializers
            .get(job.job_type.as_str())
            .ok_or_else(|| DeserializationError::UnknownCommandType(job.job_type.clone()))?;

        if !entry.supported_versions.contains(&job.version) {
            return Err(DeserializationError::UnsupportedVersion {
                job_type: job.job_type.clone(),
                version: job.version,
            });
        }

        (entry.deserialize)(&job.payload).map_err(DeserializationError::InvalidPayload)
    }

    pub fn has(&self, job_type: &str) -> bool {
        self.deserializers.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.deserializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deserializers.is_empty()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field(
                "registered_types",
                &self.deserializers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use crate::id::{CommunityId, ConversationId, MessageId, PersonId};
    use crate::store::Revision;

    fn claimed(job_type: &str, payload: serde_json::Value, version: i32) -> ClaimedJob {
        ClaimedJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            version,
            attempt: 1,
        }
    }

    #[test]
    fn decodes_transition_effects() {
        let registry = CommandRegistry::with_haggle_effects();
        let effect = TransitionEffect {
            kind: EffectKind::ConfirmedOrCancelled,
            conversation_id: ConversationId::new(),
            acting_user_id: PersonId::new(),
            community_id: CommunityId::new(),
            revision: Revision(2),
        };
        let job = claimed(
            CONFIRMED_OR_CANCELLED,
            effect.serialize_to_json().unwrap(),
            1,
        );

        let cmd = registry.deserialize(&job).unwrap();
        let decoded = cmd.as_any().downcast_ref::<TransitionEffect>().unwrap();
        assert_eq!(decoded, &effect);
    }

    #[test]
    fn decodes_notifications() {
        let registry = CommandRegistry::with_haggle_effects();
        let n = NewMessageNotification {
            conversation_id: ConversationId::new(),
            message_id: MessageId::new(),
            recipient_id: PersonId::new(),
            community_id: CommunityId::new(),
        };
        let job = claimed(NEW_MESSAGE_NOTIFICATION, n.serialize_to_json().unwrap(), 1);
        let cmd = registry.deserialize(&job).unwrap();
        assert_eq!(
            cmd.as_any().downcast_ref::<NewMessageNotification>(),
            Some(&n)
        );
    }

    #[test]
    fn unknown_types_and_versions_are_permanent_failures() {
        let registry = CommandRegistry::with_haggle_effects();

        let err = registry
            .deserialize(&claimed("listing_expired", serde_json::json!({}), 1))
            .unwrap_err();
        assert!(matches!(err, DeserializationError::UnknownCommandType(_)));
        assert_eq!(err.failure_kind(), FailureKind::NonRetryable);

        let err = registry
            .deserialize(&claimed(ACCEPTED_OR_REJECTED, serde_json::json!({}), 2))
            .unwrap_err();
        assert!(matches!(
            err,
            DeserializationError::UnsupportedVersion { version: 2, .. }
        ));
    }

    #[test]
    fn malformed_payload_is_invalid() {
        let registry = CommandRegistry::with_haggle_effects();
        let err = registry
            .deserialize(&claimed(
                ACCEPTED_OR_REJECTED,
                serde_json::json!({ "kind": "accepted_or_rejected" }),
                1,
            ))
            .unwrap_err();
        assert!(matches!(err, DeserializationError::InvalidPayload(_)));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = CommandRegistry::with_haggle_effects();
        registry.register::<TransitionEffect>(ACCEPTED_OR_REJECTED, vec![2]);
    }

    #[test]
    fn registry_reports_contents() {
        let registry = CommandRegistry::with_haggle_effects();
        assert_eq!(registry.len(), 3);
        assert!(registry.has(NEW_MESSAGE_NOTIFICATION));
        assert!(!CommandRegistry::new().has(NEW_MESSAGE_NOTIFICATION));
        assert!(CommandRegistry::new().is_empty());
        assert!(format!("{:?}", registry).contains("CommandRegistry"));
    }
}
