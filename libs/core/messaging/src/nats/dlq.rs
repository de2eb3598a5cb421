//! Dead Letter Queue management for NATS.

use crate::nats::consumer::{stream_info, StreamInfo};
use crate::nats::error::NatsError;
use async_nats::jetstream::stream::Config as JetStreamConfig;
use async_nats::jetstream::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Manager for Dead Letter Queue operations.
pub struct DlqManager {
    jetstream: Arc<Context>,
    dlq_stream: String,
    dlq_subject: String,
}

impl DlqManager {
    /// Create a new DLQ manager.
    ///
    /// Entries land on `<stream lowercased>.failed`.
    pub fn new(jetstream: Arc<Context>, dlq_stream: &str) -> Self {
        Self {
            jetstream,
            dlq_stream: dlq_stream.to_string(),
            dlq_subject: dlq_subject(dlq_stream),
        }
    }

    /// Subject new entries are published on.
    pub fn subject(&self) -> &str {
        &self.dlq_subject
    }

    /// Ensure the DLQ stream exists.
    pub async fn ensure_stream(&self) -> Result<(), NatsError> {
        match self.jetstream.get_stream(&self.dlq_stream).await {
            Ok(_) => {
                debug!(stream = %self.dlq_stream, "DLQ stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(stream = %self.dlq_stream, "Creating DLQ stream");

                self.jetstream
                    .create_stream(JetStreamConfig {
                        name: self.dlq_stream.clone(),
                        subjects: vec![format!("{}.>", self.dlq_stream.to_lowercase())],
                        max_messages: 10_000,
                        max_age: Duration::from_secs(30 * 24 * 60 * 60),
                        ..Default::default()
                    })
                    .await
                    .map_err(NatsError::from_jetstream_error)?;

                info!(stream = %self.dlq_stream, "DLQ stream created");
                Ok(())
            }
        }
    }

    /// Publish an entry to the DLQ stream and wait for the broker ack.
    pub async fn publish(&self, entry: &DlqEntry) -> Result<u64, NatsError> {
        let payload = serde_json::to_vec(entry)?;

        let ack = self
            .jetstream
            .publish(self.dlq_subject.clone(), payload.into())
            .await
            .map_err(|e| NatsError::publish_error(e.to_string()))?
            .await
            .map_err(|e| NatsError::publish_error(e.to_string()))?;

        debug!(
            job_id = %entry.job_id,
            original_sequence = entry.original_sequence,
            sequence = ack.sequence,
            "Moved message to DLQ"
        );

        Ok(ack.sequence)
    }

    /// Get DLQ stream info.
    pub async fn stream_info(&self) -> Result<StreamInfo, NatsError> {
        stream_info(&self.jetstream, &self.dlq_stream).await
    }
}

fn dlq_subject(dlq_stream: &str) -> String {
    format!("{}.failed", dlq_stream.to_lowercase())
}

/// Entry stored in the Dead Letter Queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Job ID, or `seq-<n>` when the payload never decoded
    pub job_id: String,
    /// Original payload: the job as JSON, or the raw bytes as a string
    pub payload: serde_json::Value,
    /// Error message that caused the failure
    pub error: String,
    /// Subject the message was originally published on
    pub subject: String,
    /// Original stream sequence number
    pub original_sequence: u64,
    /// Deliveries consumed before giving up
    pub delivery_count: u32,
    /// When the message was dead-lettered
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Entry for a payload that could not be decoded.
    pub fn undecodable(
        raw: &[u8],
        error: impl Into<String>,
        subject: impl Into<String>,
        sequence: u64,
        delivery_count: u32,
    ) -> Self {
        Self {
            job_id: format!("seq-{sequence}"),
            payload: serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()),
            error: error.into(),
            subject: subject.into(),
            original_sequence: sequence,
            delivery_count,
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlq_subject_is_lowercased() {
        assert_eq!(dlq_subject("NOTIFICATIONS_DLQ"), "notifications_dlq.failed");
    }

    #[test]
    fn test_undecodable_entry_keeps_raw_payload() {
        let entry = DlqEntry::undecodable(b"{not json", "expected value", "announcement.created", 42, 1);

        assert_eq!(entry.job_id, "seq-42");
        assert_eq!(entry.payload, serde_json::json!("{not json"));
        assert_eq!(entry.subject, "announcement.created");
        assert_eq!(entry.original_sequence, 42);
    }

    #[test]
    fn test_entry_serializes_with_failed_at() {
        let entry = DlqEntry::undecodable(b"x", "boom", "a.b", 1, 5);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["delivery_count"], 5);
        assert!(json["failed_at"].is_string());
    }
}
