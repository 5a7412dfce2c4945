use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use haggle_core::{JobQueue, JobSpec};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// A job that was enqueued to the spy queue.
#[derive(Debug, Clone)]
pub struct EnqueuedJob {
    /// Synthetic id generated by the spy.
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub spec: JobSpec,
    /// None for immediate background jobs.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Spy job queue that records enqueued commands for test assertions.
///
/// Jobs are never executed. Like a real queue, a second enqueue with an
/// idempotency key already recorded returns the first job's id and records
/// nothing.
///
/// ```ignore
/// let spy = SpyJobQueue::new();
/// let service = ConversationService::new(store, Arc::new(spy.clone()));
///
/// service.accept_or_reject(id, owner, &community, false, AcceptanceStatus::Accepted).await?;
///
/// spy.assert_scheduled_for(id.into_uuid(), "accepted_or_rejected");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SpyJobQueue {
    enqueued: Arc<Mutex<Vec<EnqueuedJob>>>,
}

impl SpyJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs_of_type(&self, job_type: &str) -> Vec<EnqueuedJob> {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.job_type == job_type)
            .cloned()
            .collect()
    }

    /// Payloads of one job type decoded back into their command.
    pub fn commands_of_type<C: DeserializeOwned>(&self, job_type: &str) -> Vec<C> {
        self.jobs_of_type(job_type)
            .into_iter()
            .map(|j| serde_json::from_value(j.payload).unwrap())
            .collect()
    }

    pub fn all_jobs(&self) -> Vec<EnqueuedJob> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn job_count(&self) -> usize {
        self.enqueued.lock().unwrap().len()
    }

    pub fn last_job_of_type(&self, job_type: &str) -> Option<EnqueuedJob> {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|j| j.job_type == job_type)
            .cloned()
    }

    /// # Panics
    ///
    /// Panics if no job with the given type and idempotency key was enqueued.
    pub fn assert_enqueued_with_key(&self, job_type: &str, idempotency_key: &str) {
        let jobs = self.jobs_of_type(job_type);
        let found = jobs
            .iter()
            .any(|j| j.spec.idempotency_key.as_deref() == Some(idempotency_key));
        assert!(
            found,
            "Expected job '{}' with idempotency_key '{}' to be enqueued. Found {} jobs of this type: {:?}",
            job_type,
            idempotency_key,
            jobs.len(),
            jobs.iter().map(|j| &j.spec.idempotency_key).collect::<Vec<_>>()
        );
    }

    /// # Panics
    ///
    /// Panics if any job of the given type was enqueued.
    pub fn assert_not_enqueued(&self, job_type: &str) {
        let jobs = self.jobs_of_type(job_type);
        assert!(
            jobs.is_empty(),
            "Expected no '{}' jobs to be enqueued, but found {}",
            job_type,
            jobs.len()
        );
    }

    /// # Panics
    ///
    /// Panics if no job with the given type and reference id was enqueued.
    pub fn assert_scheduled_for(&self, reference_id: Uuid, job_type: &str) {
        let jobs = self.jobs_of_type(job_type);
        assert!(
            jobs.iter().any(|j| j.spec.reference_id == Some(reference_id)),
            "Expected job '{}' with reference_id '{}' to be enqueued. Found {} jobs of this type: {:?}",
            job_type,
            reference_id,
            jobs.len(),
            jobs.iter().map(|j| &j.spec.reference_id).collect::<Vec<_>>()
        );
    }

    /// # Panics
    ///
    /// Panics if the actual count doesn't match.
    pub fn assert_job_count(&self, job_type: &str, expected: usize) {
        let actual = self.jobs_of_type(job_type).len();
        assert_eq!(
            actual, expected,
            "Expected {} jobs of type '{}', found {}",
            expected, job_type, actual
        );
    }

    /// # Panics
    ///
    /// Panics if the actual total doesn't match.
    pub fn assert_total_count(&self, expected: usize) {
        let actual = self.job_count();
        assert_eq!(
            actual, expected,
            "Expected {} total jobs, found {}",
            expected, actual
        );
    }

    fn record(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        let mut enqueued = self.enqueued.lock().unwrap();
        if let Some(key) = spec.idempotency_key.as_deref() {
            if let Some(existing) = enqueued
                .iter()
                .find(|j| j.spec.idempotency_key.as_deref() == Some(key))
            {
                return existing.id;
            }
        }

        let id = Uuid::new_v4();
        enqueued.push(EnqueuedJob {
            id,
            job_type: spec.job_type.to_string(),
            payload,
            spec,
            scheduled_at,
        });
        id
    }
}

#[async_trait::async_trait]
impl JobQueue for SpyJobQueue {
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
        Ok(self.record(payload, spec, None))
    }

    async fn schedule(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        Ok(self.record(payload, spec, Some(run_at)))
    }
}

/// A queue that is down. Counts the attempts made against it.
#[derive(Debug, Clone, Default)]
pub struct FailingJobQueue {
    attempts: Arc<AtomicUsize>,
}

impl FailingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JobQueue for FailingJobQueue {
    async fn enqueue(&self, _payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("job queue unavailable ({})", spec.job_type))
    }

    async fn schedule(
        &self,
        _payload: serde_json::Value,
        spec: JobSpec,
        _run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("job queue unavailable ({})", spec.job_type))
    }
}
