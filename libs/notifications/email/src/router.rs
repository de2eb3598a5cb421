//! Routes inbound envelopes to the use case for their event type.

use crate::dispatch::{AnnouncementCreatedPort, DispatchOutcome};
use crate::events::{AnnouncementCreated, EmailEvent, EventKind};
use async_trait::async_trait;
use messaging::{ProcessingError, Processor};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Dispatched(DispatchOutcome),
    /// Event type this worker does not handle.
    Ignored,
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("event from '{service}' has no type")]
    MissingEventType { service: String },

    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

impl From<RoutingError> for ProcessingError {
    fn from(err: RoutingError) -> Self {
        let message = err.to_string();
        ProcessingError::permanent_with_source(message, err)
    }
}

/// Stateless dispatcher from envelope to use case.
#[derive(Clone)]
pub struct EmailEventRouter {
    announcement_created: Arc<dyn AnnouncementCreatedPort>,
}

impl EmailEventRouter {
    pub fn new(announcement_created: Arc<dyn AnnouncementCreatedPort>) -> Self {
        Self {
            announcement_created,
        }
    }

    pub async fn on_message(&self, event: &EmailEvent) -> Result<RouteOutcome, RoutingError> {
        let kind = match &event.event_type {
            Some(kind) => kind,
            None => {
                error!(service = %event.service, "Received event without type");
                return Err(RoutingError::MissingEventType {
                    service: event.service.clone(),
                });
            }
        };

        match kind {
            EventKind::AnnouncementCreated => {
                let payload = AnnouncementCreated::deserialize(&event.data).map_err(|source| {
                    RoutingError::MalformedPayload {
                        kind: kind.clone(),
                        source,
                    }
                })?;
                info!(
                    service = %event.service,
                    announcement_id = payload.id,
                    "Routing announcement created event"
                );
                let outcome = self.announcement_created.execute(&payload).await;
                Ok(RouteOutcome::Dispatched(outcome))
            }
            EventKind::Other(name) => {
                debug!(service = %event.service, event_type = %name, "Ignoring unhandled event type");
                Ok(RouteOutcome::Ignored)
            }
        }
    }
}

#[async_trait]
impl Processor<EmailEvent> for EmailEventRouter {
    async fn process(&self, event: &EmailEvent) -> Result<(), ProcessingError> {
        self.on_message(event).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email-event-router"
    }
}
