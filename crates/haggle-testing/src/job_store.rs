use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use haggle_core::{ClaimedJob, FailureKind, JobStore};
use uuid::Uuid;

use crate::spy::EnqueuedJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Claimed,
    Succeeded,
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub version: i32,
    pub attempt: i32,
    pub max_retries: i32,
    pub status: JobStatus,
    pub error: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
}

/// In-memory job store for driving a worker loop in tests.
///
/// Retryable failures go back to pending until `attempt` exceeds the job's
/// `max_retries`; there is no backoff.
///
/// ```ignore
/// let jobs = MockJobStore::new();
/// jobs.seed_from(&spy.all_jobs());
///
/// for job in jobs.claim_ready("worker-1", 10).await? {
///     registry.deserialize(&job)?;
///     jobs.mark_succeeded(job.id).await?;
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockJobStore {
    jobs: Arc<Mutex<Vec<RecordedJob>>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_job(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        version: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.lock().unwrap().push(RecordedJob {
            id,
            job_type: job_type.into(),
            payload,
            version,
            attempt: 0,
            max_retries: 3,
            status: JobStatus::Pending,
            error: None,
            run_at: None,
        });
        id
    }

    /// Copy everything a spy queue recorded, keeping ids, versions, retry
    /// budgets and schedules.
    pub fn seed_from(&self, enqueued: &[EnqueuedJob]) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.extend(enqueued.iter().map(|j| RecordedJob {
            id: j.id,
            job_type: j.job_type.clone(),
            payload: j.payload.clone(),
            version: j.spec.version,
            attempt: 0,
            max_retries: j.spec.max_retries,
            status: JobStatus::Pending,
            error: None,
            run_at: j.scheduled_at,
        }));
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<RecordedJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    pub fn job_succeeded(&self, job_id: Uuid) -> bool {
        self.status_is(job_id, JobStatus::Succeeded)
    }

    pub fn job_dead_letter(&self, job_id: Uuid) -> bool {
        self.status_is(job_id, JobStatus::DeadLetter)
    }

    fn status_is(&self, job_id: Uuid, status: JobStatus) -> bool {
        self.get_job(job_id).is_some_and(|j| j.status == status)
    }
}

#[async_trait::async_trait]
impl JobStore for MockJobStore {
    async fn claim_ready(&self, _worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let mut claimed = Vec::new();

        for job in jobs.iter_mut() {
            if claimed.len() >= limit as usize {
                break;
            }
            if job.status != JobStatus::Pending || job.run_at.is_some_and(|at| at > now) {
                continue;
            }

            job.status = JobStatus::Claimed;
            job.attempt += 1;
            claimed.push(ClaimedJob {
                id: job.id,
                job_type: job.job_type.clone(),
                payload: job.payload.clone(),
                version: job.version,
                attempt: job.attempt,
            });
        }

        Ok(claimed)
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow::anyhow!("job not found: {}", job_id))?;
        job.status = JobStatus::Succeeded;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: FailureKind) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow::anyhow!("job not found: {}", job_id))?;
        job.error = Some(error.to_string());
        job.status = match kind {
            FailureKind::Retryable if job.attempt <= job.max_retries => JobStatus::Pending,
            _ => JobStatus::DeadLetter,
        };
        Ok(())
    }

    /// Only checks that the job is still claimed.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        match self.get_job(job_id) {
            None => Err(anyhow::anyhow!("job not found: {}", job_id)),
            Some(job) if job.status != JobStatus::Claimed => {
                Err(anyhow::anyhow!("job not claimed: {}", job_id))
            }
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_marks_and_limits() {
        let store = MockJobStore::new();
        let a = store.seed_job("accepted_or_rejected", serde_json::json!({}), 1);
        store.seed_job("accepted_or_rejected", serde_json::json!({}), 1);

        let claimed = store.claim_ready("worker-1", 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, a);
        assert_eq!(claimed[0].attempt, 1);
        assert_eq!(store.get_job(a).unwrap().status, JobStatus::Claimed);

        store.heartbeat(a).await.unwrap();
        store.mark_succeeded(a).await.unwrap();
        assert!(store.job_succeeded(a));
        assert!(store.heartbeat(a).await.is_err());
    }

    #[tokio::test]
    async fn retryable_failures_exhaust_the_budget() {
        let store = MockJobStore::new();
        let id = store.seed_job("confirmed_or_cancelled", serde_json::json!({}), 1);

        for _ in 0..3 {
            store.claim_ready("w", 10).await.unwrap();
            store
                .mark_failed(id, "smtp timeout", FailureKind::Retryable)
                .await
                .unwrap();
            assert_eq!(store.get_job(id).unwrap().status, JobStatus::Pending);
        }

        store.claim_ready("w", 10).await.unwrap();
        store
            .mark_failed(id, "smtp timeout", FailureKind::Retryable)
            .await
            .unwrap();
        assert!(store.job_dead_letter(id));
        assert_eq!(store.get_job(id).unwrap().error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn non_retryable_goes_straight_to_dead_letter() {
        let store = MockJobStore::new();
        let id = store.seed_job("bogus", serde_json::json!({}), 1);
        store.claim_ready("w", 10).await.unwrap();
        store
            .mark_failed(id, "unknown command type", FailureKind::NonRetryable)
            .await
            .unwrap();
        assert!(store.job_dead_letter(id));
        assert!(store.claim_ready("w", 10).await.unwrap().is_empty());
    }
}
