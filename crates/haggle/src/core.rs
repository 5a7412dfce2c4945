//! Command traits for queued effects.
//!
//! A lifecycle transition decides *what* has to happen afterwards (mail the
//! counterpart, start the payment workflow) and describes it as a
//! [`Command`]. The command is handed to a job queue; haggle never runs it.
//!
//! One transition produces one command, and every command knows its own
//! [`JobSpec`], so routing needs no external table.

use std::any::Any;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Job specification for background and scheduled commands.
///
/// ```ignore
/// impl Command for SendReminder {
///     fn execution_mode(&self) -> ExecutionMode {
///         ExecutionMode::Background
///     }
///
///     fn job_spec(&self) -> Option<JobSpec> {
///         Some(JobSpec::new("reminder:send")
///             .with_idempotency_key(format!("reminder:{}", self.conversation_id)))
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Stable identifier used for persistence, deserialization, and routing.
    /// Must not change once jobs exist in the queue.
    pub job_type: &'static str,

    /// If provided, only one pending/running job with this key can exist.
    pub idempotency_key: Option<String>,

    /// Maximum retry attempts on failure.
    pub max_retries: i32,

    /// Priority for job ordering (higher = sooner).
    pub priority: i32,

    /// Payload schema version.
    pub version: i32,

    /// The entity the job is about (the conversation, for haggle effects).
    pub reference_id: Option<Uuid>,

    /// Tenant scope (the community, for haggle effects).
    pub container_id: Option<Uuid>,
}

impl JobSpec {
    pub fn new(job_type: &'static str) -> Self {
        Self {
            job_type,
            idempotency_key: None,
            max_retries: 3,
            priority: 0,
            version: 1,
            reference_id: None,
            container_id: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_max_retries(mut self, n: i32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_priority(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }

    pub fn with_version(mut self, v: i32) -> Self {
        self.version = v;
        self
    }

    pub fn with_reference_id(mut self, id: Uuid) -> Self {
        self.reference_id = Some(id);
        self
    }

    pub fn with_container_id(mut self, id: Uuid) -> Self {
        self.container_id = Some(id);
        self
    }
}

/// A request for deferred IO.
///
/// Commands using [`ExecutionMode::Background`] or [`ExecutionMode::Scheduled`]
/// must return a [`JobSpec`] and a JSON payload; the [`auto_serialize!`]
/// macro covers the payload for any `Serialize` type.
///
/// [`auto_serialize!`]: crate::auto_serialize
pub trait Command: Any + Send + Sync + 'static {
    /// Defaults to [`ExecutionMode::Inline`].
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Inline
    }

    fn job_spec(&self) -> Option<JobSpec> {
        None
    }

    fn serialize_to_json(&self) -> Option<serde_json::Value> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run in the caller's context. Haggle registers no inline effects, so
    /// the dispatcher rejects these.
    Inline,

    /// Persist to the job queue and let a worker run it.
    Background,

    /// Persist to the job queue with a `run_at` timestamp.
    Scheduled {
        run_at: DateTime<Utc>,
    },
}

/// Type-erased command, as produced by [`CommandRegistry`](crate::CommandRegistry).
pub trait AnyCommand: Send + Sync {
    fn get_execution_mode(&self) -> ExecutionMode;

    fn get_job_spec(&self) -> Option<JobSpec>;

    fn get_serialize_to_json(&self) -> Option<serde_json::Value>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<C: Command> AnyCommand for C {
    fn get_execution_mode(&self) -> ExecutionMode {
        Command::execution_mode(self)
    }

    fn get_job_spec(&self) -> Option<JobSpec> {
        Command::job_spec(self)
    }

    fn get_serialize_to_json(&self) -> Option<serde_json::Value> {
        Command::serialize_to_json(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl<'a> std::fmt::Debug for dyn AnyCommand + 'a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyCommand")
            .field("execution_mode", &self.get_execution_mode())
            .field("job_type", &self.get_job_spec().map(|s| s.job_type))
            .finish_non_exhaustive()
    }
}
