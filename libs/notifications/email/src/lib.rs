//! Announcement notification emails over NATS JetStream.
//!
//! ## Components
//!
//! - **Events**: `EmailEvent` envelope with an `EventKind` discriminator and the
//!   typed `AnnouncementCreated` payload
//! - **Templates**: flat `{{placeholder}}` rendering, filesystem and in-memory loaders
//! - **Directory**: `DirectoryClient` over HTTP and a `RecipientResolver` with
//!   bounded retry and exponential backoff
//! - **Dispatch**: `AnnouncementCreatedUseCase`, per-recipient failure isolation
//!   and a `RecoveryHook` for abandoned dispatches
//! - **Routing**: `EmailEventRouter`, the `Processor` driven by the NATS worker
//! - **Providers**: SMTP via lettre and `MockSmtpProvider`
//! - **Topology**: `NotificationStream`
//!
//! ## Usage with NATS JetStream
//!
//! ```ignore
//! use email::{EmailEventRouter, NotificationStream};
//! use messaging::nats::NatsWorker;
//!
//! let router = EmailEventRouter::new(Arc::new(use_case));
//! let worker = NatsWorker::new(jetstream, router, NotificationStream::worker_config()).await?;
//! worker.run(shutdown_rx).await?;
//! ```

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod events;
pub mod models;
pub mod provider;
pub mod router;
pub mod streams;
pub mod templates;

pub use config::{BrandingConfig, DirectoryConfig, DispatchConfig};
pub use directory::{DirectoryClient, DirectoryError, HttpDirectoryClient, Recipient, RecipientResolver};
pub use dispatch::{
    AnnouncementCreatedPort, AnnouncementCreatedUseCase, DispatchFailure, DispatchOutcome,
    LogRecoveryHook, RecoveryHook,
};
pub use events::{AnnouncementCreated, EmailEvent, EventKind};
pub use models::Email;
pub use provider::{EmailProvider, MockSmtpProvider, SendResult, SmtpConfig, SmtpProvider};
pub use router::{EmailEventRouter, RouteOutcome, RoutingError};
pub use streams::{NotificationStream, ANNOUNCEMENT_CREATED_SUBJECT};
pub use templates::{FsTemplateLoader, InMemoryTemplateStore, TemplateError, TemplateLoader};
