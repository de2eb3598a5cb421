//! Processor trait for job execution.

use crate::error::ProcessingError;
use crate::job::Job;
use async_trait::async_trait;

/// Job processor trait.
///
/// The worker calls `process` once per delivered message and maps the result
/// onto the broker:
///
/// * `Ok(())` - acknowledged
/// * `Err` with `Transient` category - redelivered after a delay
/// * `Err` with `Permanent` category - dead-lettered and terminated
///
/// Work that may fail *partially* (e.g. one of many outbound sends) should be
/// absorbed inside the processor; only failures of the message as a whole are
/// returned.
#[async_trait]
pub trait Processor<J: Job>: Send + Sync {
    /// Process a job.
    async fn process(&self, job: &J) -> Result<(), ProcessingError>;

    /// Processor name, used for logging and metrics labels.
    fn name(&self) -> &'static str;

    /// Downstream availability check used by the readiness probe.
    async fn health_check(&self) -> Result<bool, ProcessingError> {
        Ok(true)
    }
}
