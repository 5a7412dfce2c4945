//! PostgreSQL job queue for haggle effects.
//!
//! [`PgJobStore`] is both ends of the queue: the service enqueues through
//! [`JobQueue`], workers claim and settle through [`JobStore`].
//!
//! # Features
//!
//! - Idempotent enqueue: a key that is already pending or running returns
//!   the existing job's id
//! - Claiming with `FOR UPDATE SKIP LOCKED`, highest priority first
//! - Exponential backoff retries, dead letter once the budget is spent
//! - Worker heartbeats and configurable lease timeouts
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TYPE job_status AS ENUM ('pending', 'running', 'succeeded', 'dead_letter');
//! CREATE TYPE error_kind AS ENUM ('retryable', 'non_retryable');
//!
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     version INTEGER NOT NULL DEFAULT 1,
//!     idempotency_key TEXT,
//!
//!     -- What the job is about
//!     reference_id UUID,   -- conversation
//!     container_id UUID,   -- community
//!
//!     -- Execution
//!     status job_status NOT NULL DEFAULT 'pending',
//!     attempt INTEGER NOT NULL DEFAULT 1,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!
//!     -- Scheduling
//!     priority INTEGER NOT NULL DEFAULT 0,
//!     run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!
//!     -- Worker tracking
//!     worker_id TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!
//!     -- Error tracking
//!     error_message TEXT,
//!     error_kind error_kind,
//!
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE UNIQUE INDEX idx_jobs_idempotency ON jobs (idempotency_key)
//!     WHERE status IN ('pending', 'running');
//! CREATE INDEX idx_jobs_ready ON jobs (priority DESC, run_at)
//!     WHERE status = 'pending';
//! CREATE INDEX idx_jobs_lease ON jobs (lease_expires_at)
//!     WHERE status = 'running' AND lease_expires_at IS NOT NULL;
//! CREATE INDEX idx_jobs_reference ON jobs (reference_id);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use haggle_job_postgres::PgJobStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/haggle").await?;
//! let jobs = PgJobStore::new(pool);
//!
//! let service = ConversationService::new(store, Arc::new(jobs.clone()));
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use haggle_core::{ClaimedJob, FailureKind, JobQueue, JobSpec, JobStore};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest wait between retries.
const MAX_RETRY_DELAY_SECS: i64 = 3600;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    default_lease_ms: i64,
}

impl PgJobStore {
    /// Lease timeout defaults to 60 seconds.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_lease_ms: 60_000,
        }
    }

    /// How long a worker can hold a job before it's considered abandoned.
    pub fn with_lease_timeout(pool: PgPool, lease_ms: i64) -> Self {
        Self {
            pool,
            default_lease_ms: lease_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, version, idempotency_key,
                reference_id, container_id, max_retries, priority, run_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (idempotency_key) WHERE status IN ('pending', 'running')
            DO UPDATE SET updated_at = jobs.updated_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(spec.job_type)
        .bind(&payload)
        .bind(spec.version)
        .bind(spec.idempotency_key.as_deref())
        .bind(spec.reference_id)
        .bind(spec.container_id)
        .bind(spec.max_retries)
        .bind(spec.priority)
        .bind(run_at)
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id = %id, job_type = spec.job_type, key = ?spec.idempotency_key, "job stored");
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for PgJobStore {
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
        self.insert(payload, spec, Utc::now()).await
    }

    async fn schedule(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        self.insert(payload, spec, run_at).await
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let lease_expires_at = Utc::now() + Duration::milliseconds(self.default_lease_ms);

        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND run_at <= NOW()
                ORDER BY priority DESC, run_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                worker_id = $2,
                lease_expires_at = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, job_type, payload, version, attempt
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(lease_expires_at)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ClaimedJob::from).collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retryable failures are rescheduled after [`retry_delay`] until the
    /// retry budget is spent; everything else is dead-lettered.
    async fn mark_failed(&self, job_id: Uuid, error: &str, kind: FailureKind) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (attempt, max_retries): (i32, i32) =
            sqlx::query_as("SELECT attempt, max_retries FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?;

        if should_retry(kind, attempt, max_retries) {
            let retry_at = Utc::now() + retry_delay(attempt);

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    run_at = $1,
                    attempt = attempt + 1,
                    error_message = $2,
                    error_kind = 'retryable',
                    worker_id = NULL,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(retry_at)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        } else {
            warn!(%job_id, attempt, error, "job dead-lettered");
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter',
                    error_message = $1,
                    error_kind = $2::error_kind,
                    worker_id = NULL,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(error)
            .bind(error_kind_label(kind))
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let lease_expires_at = Utc::now() + Duration::milliseconds(self.default_lease_ms);

        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $1,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(lease_expires_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl PgJobStore {
    /// Put jobs whose lease expired back to pending. Run periodically.
    pub async fn reclaim_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn cleanup_succeeded(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = 'succeeded'
              AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Every job ever enqueued about one conversation, oldest first.
    pub async fn jobs_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<JobSummary>> {
        let summaries = sqlx::query_as::<_, JobSummary>(
            r#"
            SELECT id, job_type, status::TEXT AS status, attempt, idempotency_key
            FROM jobs
            WHERE reference_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(summaries)
    }

    /// Job counts per status. Statuses with no jobs count as zero.
    pub async fn stats(&self) -> Result<QueueStats> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status::TEXT, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(QueueStats::from_counts(counts))
    }
}

/// `2^attempt` seconds, capped at an hour.
pub fn retry_delay(attempt: i32) -> Duration {
    let exponent = attempt.clamp(0, 31) as u32;
    Duration::seconds(2i64.pow(exponent).min(MAX_RETRY_DELAY_SECS))
}

/// `max_retries` counts retries, so a job runs at most `max_retries + 1` times.
fn should_retry(kind: FailureKind, attempt: i32, max_retries: i32) -> bool {
    kind == FailureKind::Retryable && attempt <= max_retries
}

fn error_kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Retryable => "retryable",
        FailureKind::NonRetryable => "non_retryable",
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    version: i32,
    attempt: i32,
}

impl From<ClaimedRow> for ClaimedJob {
    fn from(row: ClaimedRow) -> Self {
        ClaimedJob {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            version: row.version,
            attempt: row.attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct JobSummary {
    pub id: Uuid,
    pub job_type: String,
    pub status: String,
    pub attempt: i32,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub dead_letter: i64,
}

impl QueueStats {
    fn from_counts(counts: impl IntoIterator<Item = (String, i64)>) -> Self {
        let mut stats = QueueStats::default();
        for (status, count) in counts {
            match status.as_str() {
                "pending" => stats.pending = count,
                "running" => stats.running = count,
                "succeeded" => stats.succeeded = count,
                "dead_letter" => stats.dead_letter = count,
                other => warn!(status = other, count, "unexpected job status"),
            }
        }
        stats
    }

    /// Jobs still waiting for or holding a worker.
    pub fn in_flight(&self) -> i64 {
        self.pending + self.running
    }
}
