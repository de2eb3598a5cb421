//! JetStream topology for announcement notifications.
//!
//! One durable stream captures every `announcement.*` subject. A single shared
//! durable consumer feeds the email workers; transient failures are nak'ed with
//! a fixed delay and the broker stops after `MAX_DELIVER` deliveries. Anything
//! that cannot succeed lands on the dead-letter stream.

use crate::events::EventKind;
use messaging::nats::{StreamConfig as NatsStreamConfig, WorkerConfig};

/// Subject upstream services publish new announcements on.
pub const ANNOUNCEMENT_CREATED_SUBJECT: &str = "announcement.created";

/// Notification stream configuration for NATS JetStream
pub struct NotificationStream;

impl NatsStreamConfig for NotificationStream {
    const STREAM_NAME: &'static str = "NOTIFICATIONS";

    /// Shared by every worker replica
    const CONSUMER_NAME: &'static str = "notification-email";

    /// Entries are published on `notifications_dlq.failed`
    const DLQ_STREAM: &'static str = "NOTIFICATIONS_DLQ";

    const SUBJECT: &'static str = "announcement.*";

    const MAX_DELIVER: i64 = 5;

    const REDELIVERY_DELAY_SECS: u64 = 10;

    /// Extended by in-progress acks while a dispatch is still running
    const ACK_WAIT_SECS: u64 = 120;
}

impl NotificationStream {
    /// Worker configuration for this topology.
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig::from_stream::<Self>()
    }

    /// Subject an event of `kind` is published on.
    ///
    /// Always a single token under `announcement.`, so every kind is captured
    /// by the stream's wildcard.
    pub fn subject_for(kind: &EventKind) -> String {
        match kind {
            EventKind::AnnouncementCreated => ANNOUNCEMENT_CREATED_SUBJECT.to_string(),
            EventKind::Other(name) => format!("announcement.{}", subject_token(name)),
        }
    }
}

/// Lowercase `name` and replace anything that is not a safe subject character
/// (dots, wildcards, whitespace) with `_`.
fn subject_token(name: &str) -> String {
    let token: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect();

    if token.is_empty() {
        "unknown".to_string()
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_notification_stream_config() {
        assert_eq!(NotificationStream::STREAM_NAME, "NOTIFICATIONS");
        assert_eq!(NotificationStream::CONSUMER_NAME, "notification-email");
        assert_eq!(NotificationStream::DLQ_STREAM, "NOTIFICATIONS_DLQ");
        assert_eq!(NotificationStream::SUBJECT, "announcement.*");
    }

    #[test]
    fn test_worker_config_carries_redelivery_policy() {
        let config = NotificationStream::worker_config();

        assert_eq!(config.redelivery_delay, Duration::from_secs(10));
        assert_eq!(config.max_deliver, 5);
        assert_eq!(config.subject, "announcement.*");
        assert!(config.ack_wait > Duration::from_secs(2 + 4 + 3 * 5));
    }

    #[test]
    fn test_subjects_fall_under_wildcard() {
        let created = NotificationStream::subject_for(&EventKind::AnnouncementCreated);
        let other = NotificationStream::subject_for(&EventKind::Other("ANNOUNCEMENT_DELETED".into()));

        assert_eq!(created, "announcement.created");
        assert_eq!(other, "announcement.announcement_deleted");
        for subject in [created, other] {
            assert!(subject.starts_with("announcement.") && !subject[13..].contains('.'));
        }
    }

    #[test]
    fn test_unsafe_kind_names_stay_under_wildcard() {
        let cases = [
            ("ANNOUNCEMENT.DELETED", "announcement.announcement_deleted"),
            ("pinned >", "announcement.pinned__"),
            ("*", "announcement._"),
            ("  ", "announcement.unknown"),
        ];

        for (name, expected) in cases {
            let subject = NotificationStream::subject_for(&EventKind::Other(name.into()));
            assert_eq!(subject, expected);
            assert_eq!(subject.split('.').count(), 2);
            assert!(!subject.contains(['*', '>', ' ']));
        }
    }
}
