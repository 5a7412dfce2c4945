//! Testing utilities for haggle.
//!
//! - [`SpyJobQueue`] records what the service hands to the queue, with
//!   assertion helpers keyed by job type, idempotency key and reference id.
//! - [`FailingJobQueue`] refuses everything, for exercising the
//!   saved-but-not-enqueued path.
//! - [`MockJobStore`] runs the worker side: seed, claim, mark.
//! - [`StaticPreferences`] answers notification preferences from a fixed
//!   opt-out set.
//! - [`Marketplace`] builds a store with one listing and its two parties.

mod fixtures;
mod job_store;
mod preferences;
mod spy;

pub use fixtures::Marketplace;
pub use job_store::{JobStatus, MockJobStore, RecordedJob};
pub use preferences::{FailingPreferences, StaticPreferences};
pub use spy::{EnqueuedJob, FailingJobQueue, SpyJobQueue};
