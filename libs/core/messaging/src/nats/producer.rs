//! NATS JetStream producer for publishing jobs.

use crate::nats::config::StreamConfig;
use crate::nats::error::NatsError;
use crate::Job;
use async_nats::jetstream::Context;
use std::sync::Arc;
use tracing::debug;

/// Producer for publishing jobs to NATS JetStream.
#[derive(Clone)]
pub struct NatsProducer {
    jetstream: Arc<Context>,
    stream_name: String,
}

impl NatsProducer {
    /// Create a new NATS producer.
    pub fn new(jetstream: Context, stream_name: impl Into<String>) -> Self {
        Self {
            jetstream: Arc::new(jetstream),
            stream_name: stream_name.into(),
        }
    }

    /// Create a producer from a StreamConfig.
    pub fn from_stream_config<S: StreamConfig>(jetstream: Context) -> Self {
        Self::new(jetstream, S::STREAM_NAME)
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Publish a job on `subject` (within the stream's subject space).
    ///
    /// Returns the sequence number of the published message.
    pub async fn send_to<J: Job>(&self, subject: &str, job: &J) -> Result<u64, NatsError> {
        let job_json = serde_json::to_vec(job)?;

        let ack = self
            .jetstream
            .publish(subject.to_string(), job_json.into())
            .await
            .map_err(|e| NatsError::publish_error(e.to_string()))?
            .await
            .map_err(|e| NatsError::publish_error(e.to_string()))?;

        debug!(
            stream = %self.stream_name,
            subject = %subject,
            sequence = ack.sequence,
            job_id = %job.job_id(),
            "Published job"
        );

        Ok(ack.sequence)
    }
}
