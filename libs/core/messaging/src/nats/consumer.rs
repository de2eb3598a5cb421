//! NATS JetStream consumer for receiving jobs.

use crate::nats::config::WorkerConfig;
use crate::nats::error::NatsError;
use crate::Job;
use async_nats::jetstream::consumer::pull::Config as ConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::stream::Config as JetStreamConfig;
use async_nats::jetstream::{AckKind, Context, Message};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Consumer for receiving jobs from NATS JetStream.
///
/// The durable consumer is shared by every worker instance, so each message
/// is handed to exactly one of them at a time.
pub struct NatsConsumer {
    jetstream: Arc<Context>,
    config: WorkerConfig,
    consumer: OnceCell<Consumer<ConsumerConfig>>,
}

impl NatsConsumer {
    /// Create a new NATS consumer.
    pub fn new(jetstream: Arc<Context>, config: WorkerConfig) -> Self {
        Self {
            jetstream,
            config,
            consumer: OnceCell::new(),
        }
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    /// Get the consumer name.
    pub fn consumer_name(&self) -> &str {
        &self.config.consumer_name
    }

    /// Ensure the stream exists, creating it if necessary.
    pub async fn ensure_stream(&self) -> Result<(), NatsError> {
        match self.jetstream.get_stream(&self.config.stream_name).await {
            Ok(mut stream) => {
                let info = stream.info().await.map_err(NatsError::from_jetstream_error)?;
                debug!(
                    stream = %self.config.stream_name,
                    messages = info.state.messages,
                    "Stream already exists"
                );
                Ok(())
            }
            Err(_) => {
                info!(
                    stream = %self.config.stream_name,
                    subject = %self.config.subject,
                    "Creating stream"
                );

                self.jetstream
                    .create_stream(JetStreamConfig {
                        name: self.config.stream_name.clone(),
                        subjects: vec![self.config.subject.clone()],
                        max_messages: 100_000,
                        max_age: Duration::from_secs(7 * 24 * 60 * 60),
                        ..Default::default()
                    })
                    .await
                    .map_err(NatsError::from_jetstream_error)?;

                info!(stream = %self.config.stream_name, "Stream created");
                Ok(())
            }
        }
    }

    async fn get_or_create_consumer(&self) -> Result<Consumer<ConsumerConfig>, NatsError> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(NatsError::from_jetstream_error)?;

        match stream
            .get_consumer::<ConsumerConfig>(&self.config.consumer_name)
            .await
        {
            Ok(consumer) => {
                debug!(consumer = %self.config.consumer_name, "Consumer already exists");
                Ok(consumer)
            }
            Err(_) => {
                info!(
                    consumer = %self.config.consumer_name,
                    stream = %self.config.stream_name,
                    max_deliver = self.config.max_deliver,
                    "Creating consumer"
                );

                stream
                    .create_consumer(ConsumerConfig {
                        durable_name: Some(self.config.consumer_name.clone()),
                        name: Some(self.config.consumer_name.clone()),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: self.config.ack_wait,
                        max_deliver: self.config.max_deliver,
                        filter_subject: self.config.subject.clone(),
                        ..Default::default()
                    })
                    .await
                    .map_err(NatsError::from_jetstream_error)
            }
        }
    }

    /// Ensure the durable consumer exists. Resolved once and cached.
    pub async fn ensure_consumer(&self) -> Result<&Consumer<ConsumerConfig>, NatsError> {
        self.consumer
            .get_or_try_init(|| self.get_or_create_consumer())
            .await
    }

    /// Initialize stream and consumer.
    pub async fn init(&self) -> Result<(), NatsError> {
        self.ensure_stream().await?;
        self.ensure_consumer().await?;
        Ok(())
    }

    /// Fetch a batch of deliveries.
    ///
    /// Payloads that fail to decode are returned as [`Delivery::Undecodable`]
    /// so the caller can dead-letter them instead of dropping them.
    pub async fn fetch<J: Job>(&self, batch_size: usize) -> Result<Vec<Delivery<J>>, NatsError> {
        let consumer = self.ensure_consumer().await?;

        let mut messages = consumer
            .fetch()
            .max_messages(batch_size)
            .expires(self.config.fetch_timeout)
            .messages()
            .await
            .map_err(NatsError::from_jetstream_error)?;

        let mut result = Vec::new();

        while let Some(msg) = messages.next().await {
            let message = match msg {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Error receiving message");
                    continue;
                }
            };

            let (sequence, delivery_count) = match message.info() {
                Ok(info) => (
                    info.stream_sequence,
                    u32::try_from(info.delivered).unwrap_or(1),
                ),
                Err(e) => {
                    warn!(error = %e, "Failed to get message info, using defaults");
                    (0, 1)
                }
            };
            let subject = message.subject.to_string();

            match serde_json::from_slice::<J>(&message.payload) {
                Ok(job) => result.push(Delivery::Decoded(NatsMessage {
                    job,
                    message,
                    subject,
                    sequence,
                    delivery_count,
                })),
                Err(e) => {
                    warn!(
                        subject = %subject,
                        sequence = sequence,
                        error = %e,
                        "Failed to deserialize message"
                    );
                    result.push(Delivery::Undecodable(RawMessage {
                        error: e.to_string(),
                        message,
                        subject,
                        sequence,
                        delivery_count,
                    }));
                }
            }
        }

        Ok(result)
    }

    /// Get stream info.
    pub async fn stream_info(&self) -> Result<StreamInfo, NatsError> {
        stream_info(&self.jetstream, &self.config.stream_name).await
    }
}

pub(crate) async fn stream_info(jetstream: &Context, name: &str) -> Result<StreamInfo, NatsError> {
    let mut stream = jetstream
        .get_stream(name)
        .await
        .map_err(NatsError::from_jetstream_error)?;

    let info = stream.info().await.map_err(NatsError::from_jetstream_error)?;

    Ok(StreamInfo {
        stream_name: name.to_string(),
        messages: info.state.messages,
        bytes: info.state.bytes,
        first_sequence: info.state.first_sequence,
        last_sequence: info.state.last_sequence,
        consumer_count: info.state.consumer_count as i64,
    })
}

/// One delivery pulled from the stream.
pub enum Delivery<J: Job> {
    /// Payload decoded into the job type.
    Decoded(NatsMessage<J>),
    /// Payload could not be decoded.
    Undecodable(RawMessage),
}

/// A message received from NATS with metadata.
pub struct NatsMessage<J: Job> {
    /// The deserialized job.
    pub job: J,
    message: Message,
    /// Subject the message was published on.
    pub subject: String,
    /// Stream sequence number.
    pub sequence: u64,
    /// Number of delivery attempts, starting at 1.
    pub delivery_count: u32,
}

impl<J: Job> NatsMessage<J> {
    /// Get the job ID.
    pub fn job_id(&self) -> String {
        self.job.job_id()
    }

    /// Check if this is a redelivery.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Acknowledge the message (successful processing).
    pub async fn ack(self) -> Result<(), NatsError> {
        acknowledge(&self.message, AckKind::Ack).await
    }

    /// Reset the ack timer without settling the message.
    pub async fn in_progress(&self) -> Result<(), NatsError> {
        acknowledge(&self.message, AckKind::Progress).await
    }

    /// Negative acknowledge with delay.
    pub async fn nak_with_delay(self, delay: Duration) -> Result<(), NatsError> {
        acknowledge(&self.message, AckKind::Nak(Some(delay))).await
    }

    /// Mark as permanently failed (won't be redelivered).
    pub async fn term(self) -> Result<(), NatsError> {
        acknowledge(&self.message, AckKind::Term).await
    }
}

/// A message whose payload could not be decoded.
pub struct RawMessage {
    message: Message,
    /// Decoder error.
    pub error: String,
    /// Subject the message was published on.
    pub subject: String,
    /// Stream sequence number.
    pub sequence: u64,
    /// Number of delivery attempts, starting at 1.
    pub delivery_count: u32,
}

impl RawMessage {
    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    /// Mark as permanently failed (won't be redelivered).
    pub async fn term(self) -> Result<(), NatsError> {
        acknowledge(&self.message, AckKind::Term).await
    }
}

async fn acknowledge(message: &Message, kind: AckKind) -> Result<(), NatsError> {
    message
        .ack_with(kind)
        .await
        .map_err(|e| NatsError::consumer_error(e.to_string()))
}

/// Stream information.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_name: String,
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: i64,
}
