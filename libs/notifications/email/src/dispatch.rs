//! Announcement dispatch: render once, resolve recipients, fan out sends.

use crate::config::{BrandingConfig, DispatchConfig};
use crate::directory::{DirectoryError, RecipientResolver};
use crate::events::AnnouncementCreated;
use crate::models::Email;
use crate::provider::EmailProvider;
use crate::templates::{render_announcement, TemplateError, TemplateLoader, ANNOUNCEMENT_CREATED_TEMPLATE};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use messaging::RetryError;
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Result of one dispatch. Individual send failures are not reported here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every deliverable recipient got one send attempt.
    Completed { recipients: usize, skipped: usize },
    /// The directory returned nobody.
    NoRecipients,
    /// Nothing was sent; the recovery hook was invoked.
    Abandoned,
}

/// Why a dispatch was abandoned before any send.
#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error("template unavailable: {0}")]
    Template(#[from] TemplateError),

    #[error("recipients unavailable: {0}")]
    RecipientsUnavailable(#[from] RetryError<DirectoryError>),
}

impl DispatchFailure {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchFailure::Template(_) => "template",
            DispatchFailure::RecipientsUnavailable(_) => "recipients_unavailable",
        }
    }
}

/// Invoked once when a dispatch is abandoned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn recover(&self, payload: &AnnouncementCreated, failure: &DispatchFailure);
}

/// Logs the failure and counts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecoveryHook;

#[async_trait]
impl RecoveryHook for LogRecoveryHook {
    async fn recover(&self, payload: &AnnouncementCreated, failure: &DispatchFailure) {
        error!(
            announcement_id = payload.id,
            title = payload.title.as_deref().unwrap_or_default(),
            reason = failure.reason(),
            error = %failure,
            "Abandoning announcement notification"
        );
        counter!("notification_dispatch_abandoned_total", "reason" => failure.reason())
            .increment(1);
    }
}

/// Entry point for `ANNOUNCEMENT_CREATED` events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnnouncementCreatedPort: Send + Sync {
    async fn execute(&self, payload: &AnnouncementCreated) -> DispatchOutcome;
}

pub struct AnnouncementCreatedUseCase {
    templates: Arc<dyn TemplateLoader>,
    resolver: RecipientResolver,
    provider: Arc<dyn EmailProvider>,
    recovery: Arc<dyn RecoveryHook>,
    branding: BrandingConfig,
    config: DispatchConfig,
}

impl AnnouncementCreatedUseCase {
    pub fn new(
        templates: Arc<dyn TemplateLoader>,
        resolver: RecipientResolver,
        provider: Arc<dyn EmailProvider>,
    ) -> Self {
        Self {
            templates,
            resolver,
            provider,
            recovery: Arc::new(LogRecoveryHook),
            branding: BrandingConfig::default(),
            config: DispatchConfig::default(),
        }
    }

    pub fn with_recovery_hook(mut self, recovery: Arc<dyn RecoveryHook>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_branding(mut self, branding: BrandingConfig) -> Self {
        self.branding = branding;
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    async fn abandon(
        &self,
        payload: &AnnouncementCreated,
        failure: DispatchFailure,
    ) -> DispatchOutcome {
        self.recovery.recover(payload, &failure).await;
        DispatchOutcome::Abandoned
    }

    /// One send, bounded by the send timeout. Never fails the caller.
    async fn send_one(&self, to: String, subject: &str, body: &str) -> bool {
        let email = Email::new(to, subject).with_html(body);

        match tokio::time::timeout(self.config.send_timeout, self.provider.send(&email)).await {
            Ok(Ok(result)) => {
                counter!("notification_emails_sent_total").increment(1);
                info!(to = %email.to, message_id = %result.message_id, "Email sent");
                true
            }
            Ok(Err(e)) => {
                counter!("notification_emails_failed_total", "reason" => "error").increment(1);
                warn!(to = %email.to, error = %e, "Failed to send email");
                false
            }
            Err(_) => {
                counter!("notification_emails_failed_total", "reason" => "timeout").increment(1);
                warn!(
                    to = %email.to,
                    timeout_ms = self.config.send_timeout.as_millis() as u64,
                    "Email send timed out"
                );
                false
            }
        }
    }
}

#[async_trait]
impl AnnouncementCreatedPort for AnnouncementCreatedUseCase {
    #[instrument(skip_all, fields(announcement_id = payload.id))]
    async fn execute(&self, payload: &AnnouncementCreated) -> DispatchOutcome {
        info!(
            title = payload.title.as_deref().unwrap_or_default(),
            "Sending emails for new announcement"
        );

        let body = match self.templates.load(ANNOUNCEMENT_CREATED_TEMPLATE).await {
            Ok(template) => render_announcement(&template, payload, &self.branding),
            Err(e) => return self.abandon(payload, e.into()).await,
        };

        let recipients = match self.resolver.resolve(&payload.token).await {
            Ok(recipients) => recipients,
            Err(e) => return self.abandon(payload, e.into()).await,
        };

        if recipients.is_empty() {
            info!("No recipients for announcement");
            return DispatchOutcome::NoRecipients;
        }

        let mut addresses = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            match recipient.deliverable_email() {
                Some(email) => addresses.push(email.to_string()),
                None => warn!(user_id = ?recipient.id, "Skipping recipient without email"),
            }
        }
        let attempted = addresses.len();
        let skipped = recipients.len() - attempted;

        let subject = format!(
            "{}{}",
            self.config.subject_prefix,
            payload.title.as_deref().unwrap_or_default()
        );

        let sent = stream::iter(addresses)
            .map(|to| self.send_one(to, &subject, &body))
            .buffer_unordered(self.config.send_concurrency.max(1))
            .filter(|ok| future::ready(*ok))
            .count()
            .await;

        info!(
            recipients = attempted,
            sent,
            failed = attempted - sent,
            skipped,
            "Announcement dispatch finished"
        );

        DispatchOutcome::Completed {
            recipients: attempted,
            skipped,
        }
    }
}
