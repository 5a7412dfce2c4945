use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use haggle_core::{NotificationPreferences, PersonId};

/// Everyone receives notifications except the people opted out.
#[derive(Debug, Clone, Default)]
pub struct StaticPreferences {
    opted_out: Arc<Mutex<HashSet<PersonId>>>,
}

impl StaticPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opt_out(&self, person: PersonId) -> &Self {
        self.opted_out.lock().unwrap().insert(person);
        self
    }
}

#[async_trait::async_trait]
impl NotificationPreferences for StaticPreferences {
    async fn receives_new_message_notifications(&self, person: PersonId) -> anyhow::Result<bool> {
        Ok(!self.opted_out.lock().unwrap().contains(&person))
    }
}

/// A preference lookup that fails for one person and allows everyone else.
#[derive(Debug, Clone)]
pub struct FailingPreferences {
    pub broken_for: PersonId,
}

#[async_trait::async_trait]
impl NotificationPreferences for FailingPreferences {
    async fn receives_new_message_notifications(&self, person: PersonId) -> anyhow::Result<bool> {
        if person == self.broken_for {
            anyhow::bail!("preferences unavailable for {}", person);
        }
        Ok(true)
    }
}
