pub mod registry;

pub use registry::{JobRegistry, JobHandler, BoxJobFuture};

use crate::JobError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Trait for defining jobs that can be processed by the queue
///
/// The job value itself is the argument list: it is serialized at dispatch
/// time and rebuilt from the payload by the worker. Keep it to ids and plain
/// fields; load domain objects inside [`Job::handle`].
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Context type passed to job execution
    type Context: Send + Sync + Clone + 'static;

    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    /// Queue used by `Dispatcher::dispatch`
    const QUEUE: &'static str = "default";

    /// Attempt ceiling; `None` defers to the worker configuration
    const MAX_ATTEMPTS: Option<u32> = None;

    /// Execution timeout; `None` defers to the worker configuration
    const TIMEOUT: Option<Duration> = None;

    /// Execute the job with the given context
    async fn handle(&self, ctx: Self::Context) -> Result<(), JobError>;

    /// Get the job type identifier for dispatch
    fn job_type(&self) -> &'static str {
        Self::JOB_TYPE
    }
}
