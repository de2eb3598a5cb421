//! Configuration for NATS JetStream workers.

use std::time::Duration;

/// Stream configuration trait (type-safe constants).
///
/// Implement this trait to describe a stream, its durable consumer and its
/// dead-letter stream.
pub trait StreamConfig {
    /// JetStream stream name (e.g., "NOTIFICATIONS")
    const STREAM_NAME: &'static str;

    /// Durable consumer name, shared by every worker instance
    const CONSUMER_NAME: &'static str;

    /// Dead letter stream name (e.g., "NOTIFICATIONS_DLQ")
    const DLQ_STREAM: &'static str;

    /// Subject pattern captured by the stream and filtered by the consumer
    const SUBJECT: &'static str = ">";

    /// Maximum deliveries before the message is dead-lettered (default: 5)
    const MAX_DELIVER: i64 = 5;

    /// Delay the broker holds a nak'ed message before redelivery (default: 10s)
    const REDELIVERY_DELAY_SECS: u64 = 10;

    /// Ack wait timeout in seconds (default: 60)
    const ACK_WAIT_SECS: u64 = 60;
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// JetStream stream name
    pub stream_name: String,

    /// Durable consumer name
    pub consumer_name: String,

    /// Subject to subscribe to
    pub subject: String,

    /// Dead letter stream name
    pub dlq_stream: String,

    /// Batch size for fetching messages
    pub batch_size: usize,

    /// Fetch timeout
    pub fetch_timeout: Duration,

    /// Maximum deliveries before DLQ
    pub max_deliver: i64,

    /// Delay before a nak'ed message is redelivered
    pub redelivery_delay: Duration,

    /// Ack wait timeout, must exceed the longest expected processing time
    pub ack_wait: Duration,

    /// Maximum messages processed concurrently
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream_name: "JOBS".to_string(),
            consumer_name: "worker".to_string(),
            subject: ">".to_string(),
            dlq_stream: "JOBS_DLQ".to_string(),
            batch_size: 10,
            fetch_timeout: Duration::from_secs(5),
            max_deliver: 5,
            redelivery_delay: Duration::from_secs(10),
            ack_wait: Duration::from_secs(60),
            max_concurrent_jobs: 4,
        }
    }
}

impl WorkerConfig {
    /// Create a new worker configuration with the given stream name.
    pub fn new(stream_name: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        let dlq_stream = format!("{}_DLQ", &stream_name);
        Self {
            stream_name,
            dlq_stream,
            ..Default::default()
        }
    }

    /// Create from a StreamConfig trait.
    pub fn from_stream<S: StreamConfig>() -> Self {
        Self {
            stream_name: S::STREAM_NAME.to_string(),
            consumer_name: S::CONSUMER_NAME.to_string(),
            subject: S::SUBJECT.to_string(),
            dlq_stream: S::DLQ_STREAM.to_string(),
            max_deliver: S::MAX_DELIVER,
            redelivery_delay: Duration::from_secs(S::REDELIVERY_DELAY_SECS),
            ack_wait: Duration::from_secs(S::ACK_WAIT_SECS),
            ..Default::default()
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the maximum concurrent jobs (at least 1).
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Maximum deliveries as an unsigned count.
    pub fn max_deliver_count(&self) -> u32 {
        u32::try_from(self.max_deliver.max(1)).unwrap_or(u32::MAX)
    }

    /// Messages pulled per fetch.
    ///
    /// Never more than can run at once: a fetched message's ack timer is
    /// already running while it waits for a free slot.
    pub fn fetch_size(&self) -> usize {
        self.batch_size.clamp(1, self.max_concurrent_jobs.max(1))
    }

    /// How often an in-flight message is marked as in progress, half the
    /// ack wait with a one second floor.
    pub fn progress_interval(&self) -> Duration {
        (self.ack_wait / 2).max(Duration::from_secs(1))
    }
}
