//! Mock email provider for tests and local runs

use super::{EmailProvider, SendResult};
use crate::models::Email;
use async_trait::async_trait;
use eyre::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock email provider that captures sent emails.
///
/// Every call to `send` is recorded as an attempt, whether it succeeds or not.
/// Failures can be scripted for all recipients or for specific addresses.
#[derive(Clone, Default)]
pub struct MockSmtpProvider {
    sent_emails: Arc<Mutex<Vec<Email>>>,
    attempts: Arc<Mutex<Vec<String>>>,
    failing_addresses: HashSet<String>,
    failure_message: Option<String>,
    delay: Option<Duration>,
}

impl MockSmtpProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provider that always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Fail sends addressed to `address`, accept everything else
    pub fn failing_for(mut self, address: impl Into<String>) -> Self {
        self.failing_addresses.insert(address.into());
        self
    }

    /// Sleep before answering each send
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all successfully sent emails
    pub async fn sent_emails(&self) -> Vec<Email> {
        self.sent_emails.lock().await.clone()
    }

    /// Get the count of successfully sent emails
    pub async fn sent_count(&self) -> usize {
        self.sent_emails.lock().await.len()
    }

    /// Addresses of every send attempt, in call order
    pub async fn attempts(&self) -> Vec<String> {
        self.attempts.lock().await.clone()
    }

    /// Get the count of send attempts
    pub async fn attempt_count(&self) -> usize {
        self.attempts.lock().await.len()
    }

    /// Check if an email was sent to a specific address
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent_emails
            .lock()
            .await
            .iter()
            .any(|e| e.to == email)
    }

    fn should_fail(&self, to: &str) -> bool {
        self.failure_message.is_some() || self.failing_addresses.contains(to)
    }
}

#[async_trait]
impl EmailProvider for MockSmtpProvider {
    async fn send(&self, email: &Email) -> Result<SendResult> {
        self.attempts.lock().await.push(email.to.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail(&email.to) {
            let message = self
                .failure_message
                .clone()
                .unwrap_or_else(|| format!("Mock failure for {}", email.to));
            return Err(eyre::eyre!(message));
        }

        self.sent_emails.lock().await.push(email.clone());

        Ok(SendResult {
            message_id: format!("mock-{}", email.id),
        })
    }

    async fn health_check(&self) -> Result<()> {
        if self.failure_message.is_some() {
            return Err(eyre::eyre!("Mock health check failed"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
