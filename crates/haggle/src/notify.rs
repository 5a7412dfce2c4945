//! Per-person notification preferences.

use async_trait::async_trait;

use crate::id::PersonId;

/// Whether a person wants mail about new messages.
///
/// Consulted once per recipient by
/// [`ConversationService::notify_participants`](crate::ConversationService::notify_participants).
#[async_trait]
pub trait NotificationPreferences: Send + Sync + 'static {
    async fn receives_new_message_notifications(&self, person: PersonId) -> anyhow::Result<bool>;
}

/// Everyone opts in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyEveryone;

#[async_trait]
impl NotificationPreferences for NotifyEveryone {
    async fn receives_new_message_notifications(&self, _person: PersonId) -> anyhow::Result<bool> {
        Ok(true)
    }
}
