//! Handing commands to a job queue.
//!
//! Haggle never executes its effects. The [`EffectDispatcher`] serializes a
//! command, stamps the configured retry and priority policy onto its
//! [`JobSpec`], and passes both to a [`JobQueue`]. Commands that ask to run
//! inline are refused: there is nothing in this crate to run them.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::core::{AnyCommand, ExecutionMode, JobSpec};
use crate::error::HaggleError;

/// Job queue for background and scheduled commands.
///
/// The queue receives pre-serialized payloads along with their metadata.
/// Implementations should honour [`JobSpec::idempotency_key`]: enqueuing a
/// key that is already pending returns the existing job's id.
///
/// ```ignore
/// #[async_trait]
/// impl JobQueue for MyJobQueue {
///     async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
///         self.db.insert_job(spec.job_type, payload, spec.idempotency_key).await
///     }
///
///     async fn schedule(&self, payload: serde_json::Value, spec: JobSpec, run_at: DateTime<Utc>) -> Result<Uuid> {
///         // Same as enqueue, with run_at
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueue a command for immediate background execution.
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid>;

    /// Schedule a command for execution at or after `run_at`.
    async fn schedule(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid>;
}

/// A job queue that rejects everything.
///
/// With this queue every transition still commits; the effect handoff fails
/// and is logged.
pub struct NoOpJobQueue;

#[async_trait::async_trait]
impl JobQueue for NoOpJobQueue {
    async fn enqueue(&self, _payload: serde_json::Value, _spec: JobSpec) -> Result<Uuid> {
        Err(anyhow!(
            "background commands not supported: no job queue configured"
        ))
    }

    async fn schedule(
        &self,
        _payload: serde_json::Value,
        _spec: JobSpec,
        _run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        Err(anyhow!(
            "scheduled commands not supported: no job queue configured"
        ))
    }
}

#[derive(Clone)]
pub struct EffectDispatcher {
    queue: Arc<dyn JobQueue>,
    config: ServiceConfig,
}

impl EffectDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, config: ServiceConfig) -> Self {
        Self { queue, config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    /// Route one command by its execution mode. Returns the queue's job id.
    pub async fn dispatch(&self, command: &dyn AnyCommand) -> Result<Uuid, HaggleError> {
        let mode = command.get_execution_mode();
        let run_at = match mode {
            ExecutionMode::Inline => {
                return Err(HaggleError::Dispatch(format!(
                    "inline command {:?} has no effect to run",
                    command
                )))
            }
            ExecutionMode::Background => None,
            ExecutionMode::Scheduled { run_at } => Some(run_at),
        };

        let spec = command.get_job_spec().ok_or_else(|| {
            HaggleError::Dispatch(format!(
                "command {:?} uses {:?} execution mode but did not provide job_spec()",
                command, mode
            ))
        })?;
        let payload = command.get_serialize_to_json().ok_or_else(|| {
            HaggleError::Dispatch(format!(
                "command {:?} uses {:?} execution mode but did not provide serialize_to_json()",
                command, mode
            ))
        })?;
        let spec = self.config.apply(spec);
        let job_type = spec.job_type;

        let job_id = match run_at {
            None => self.queue.enqueue(payload, spec).await,
            Some(run_at) => self.queue.schedule(payload, spec, run_at).await,
        }
        .map_err(|e| HaggleError::Dispatch(format!("{job_type}: {e:#}")))?;

        debug!(%job_id, job_type, "effect handed to job queue");
        Ok(job_id)
    }
}

impl std::fmt::Debug for EffectDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Command;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        enqueued: Mutex<Vec<JobSpec>>,
        scheduled: Mutex<Vec<(JobSpec, DateTime<Utc>)>>,
    }

    #[async_trait::async_trait]
    impl JobQueue for RecordingQueue {
        async fn enqueue(&self, _payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
            self.enqueued.lock().unwrap().push(spec);
            Ok(Uuid::new_v4())
        }

        async fn schedule(
            &self,
            _payload: serde_json::Value,
            spec: JobSpec,
            run_at: DateTime<Utc>,
        ) -> Result<Uuid> {
            self.scheduled.lock().unwrap().push((spec, run_at));
            Ok(Uuid::new_v4())
        }
    }

    struct InlineCommand;
    impl Command for InlineCommand {}

    struct Later {
        run_at: DateTime<Utc>,
    }
    impl Command for Later {
        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Scheduled {
                run_at: self.run_at,
            }
        }
        fn job_spec(&self) -> Option<JobSpec> {
            Some(JobSpec::new("reminder"))
        }
        fn serialize_to_json(&self) -> Option<serde_json::Value> {
            Some(serde_json::json!({}))
        }
    }

    struct NoPayload;
    impl Command for NoPayload {
        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Background
        }
        fn job_spec(&self) -> Option<JobSpec> {
            Some(JobSpec::new("broken"))
        }
    }

    struct Now;
    impl Command for Now {
        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Background
        }
        fn job_spec(&self) -> Option<JobSpec> {
            Some(JobSpec::new("now").with_max_retries(10))
        }
        fn serialize_to_json(&self) -> Option<serde_json::Value> {
            Some(serde_json::json!({ "n": 1 }))
        }
    }

    fn dispatcher(queue: Arc<RecordingQueue>) -> EffectDispatcher {
        EffectDispatcher::new(queue, ServiceConfig::default().with_effect_priority(4))
    }

    #[tokio::test]
    async fn background_commands_are_enqueued_with_policy() {
        let queue = Arc::new(RecordingQueue::default());
        dispatcher(queue.clone()).dispatch(&Now).await.unwrap();

        let enqueued = queue.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].priority, 4);
        assert_eq!(enqueued[0].max_retries, 3);
    }

    #[tokio::test]
    async fn scheduled_commands_keep_run_at() {
        let queue = Arc::new(RecordingQueue::default());
        let run_at = Utc::now() + chrono::Duration::hours(1);
        dispatcher(queue.clone())
            .dispatch(&Later { run_at })
            .await
            .unwrap();

        let scheduled = queue.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, run_at);
        assert!(queue.enqueued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inline_and_malformed_commands_are_refused() {
        let queue = Arc::new(RecordingQueue::default());
        let d = dispatcher(queue.clone());

        assert!(matches!(
            d.dispatch(&InlineCommand).await,
            Err(HaggleError::Dispatch(_))
        ));
        let err = d.dispatch(&NoPayload).await.unwrap_err();
        assert!(err.to_string().contains("serialize_to_json"));
        assert!(queue.enqueued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_failure_surfaces_as_dispatch_error() {
        let d = EffectDispatcher::new(Arc::new(NoOpJobQueue), ServiceConfig::default());
        let err = d.dispatch(&Now).await.unwrap_err();
        assert!(matches!(err, HaggleError::Dispatch(ref m) if m.contains("no job queue")));
    }
}
