//! Structured error types for haggle.
//!
//! [`HaggleError`] is what every public operation returns. Collaborators
//! (stores, job queues, notification preferences) speak `anyhow` internally;
//! their failures are wrapped at the boundary so callers can still match on
//! the cases they care about:
//!
//! ```ignore
//! match service.confirm_or_cancel(id, actor, &community, true, ClosingStatus::Confirmed).await {
//!     Ok(outcome) => tracing::info!(revision = %outcome.revision, "closed"),
//!     Err(HaggleError::NotFound { entity, id }) => tracing::warn!(entity, %id, "not a participant"),
//!     Err(HaggleError::Conflict) => { /* reload and retry */ }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use thiserror::Error;

/// Errors surfaced by haggle operations.
#[derive(Debug, Error)]
pub enum HaggleError {
    /// Input rejected at the point of mutation: title length, unknown
    /// status, duplicate participant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A lookup found nothing. Raised for non-participants as well as for
    /// missing conversations and listings.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another writer saved the conversation since it was loaded.
    #[error("revision conflict: conversation was modified concurrently")]
    Conflict,

    /// Storage backend failed.
    #[error("storage error: {0}")]
    Store(#[source] anyhow::Error),

    /// A command could not be handed to the job queue.
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

impl HaggleError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns true for [`HaggleError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`HaggleError::Validation`].
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Errors from conversation storage.
///
/// The distinction matters: a conflict means the caller lost a race and may
/// reload, a backend failure is a system-level problem.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored revision moved since the aggregate was loaded.
    #[error("revision conflict: state was modified concurrently")]
    Conflict,

    /// Storage backend failed (timeout, connection, serialization).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for HaggleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => HaggleError::Conflict,
            StoreError::Backend(e) => HaggleError::Store(e),
        }
    }
}

pub type Result<T, E = HaggleError> = std::result::Result<T, E>;
