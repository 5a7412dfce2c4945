//! Service configuration.

use serde::Deserialize;

use crate::core::JobSpec;
use crate::effect::NEW_MESSAGE_NOTIFICATION;

/// Knobs applied to every job spec the service hands to the queue.
///
/// Loadable from JSON; missing fields take their defaults.
///
/// ```ignore
/// let config: ServiceConfig = serde_json::from_str(r#"{ "effect_priority": 5 }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Retry budget for every queued effect.
    pub effect_max_retries: i32,
    /// Priority for lifecycle effects.
    pub effect_priority: i32,
    /// Priority for new-message notifications.
    pub notification_priority: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            effect_max_retries: 3,
            effect_priority: 0,
            notification_priority: 0,
        }
    }
}

impl ServiceConfig {
    pub fn with_effect_max_retries(mut self, n: i32) -> Self {
        self.effect_max_retries = n;
        self
    }

    pub fn with_effect_priority(mut self, p: i32) -> Self {
        self.effect_priority = p;
        self
    }

    pub fn with_notification_priority(mut self, p: i32) -> Self {
        self.notification_priority = p;
        self
    }

    pub(crate) fn apply(&self, spec: JobSpec) -> JobSpec {
        let priority = if spec.job_type == NEW_MESSAGE_NOTIFICATION {
            self.notification_priority
        } else {
            self.effect_priority
        };
        spec.with_max_retries(self.effect_max_retries)
            .with_priority(priority)
    }
}
