//! NATS JetStream worker framework.
//!
//! Maps the `Processor` contract onto JetStream primitives:
//!
//! ```text
//! ┌────────────────┐     ┌─────────────────────┐     ┌────────────────┐
//! │   Producer     │────▶│   NATS JetStream    │────▶│     Worker     │
//! │ (NatsProducer) │     │   (Durable Stream)  │     │ (NatsWorker)   │
//! └────────────────┘     └──────────▲──────────┘     └───────┬────────┘
//!                                   │ nak(delay)             │
//!                                   └────────────────────────┤
//!                        ┌─────────────────┐        ┌────────▼───────┐
//!                        │   DLQ Stream    │◀───────│   Processor    │
//!                        │ (Dead Letters)  │  term  │ (Your Logic)   │
//!                        └─────────────────┘        └────────────────┘
//! ```
//!
//! - **Ack** on success
//! - **Nak with delay** on transient failure: the broker holds the message for
//!   the redelivery delay and hands it back, bounded by `max_deliver`
//! - **Term + DLQ entry** on permanent failure, on undecodable payloads, and
//!   once the delivery budget is spent
//! - **In progress** every half ack wait while the processor is still running,
//!   so a long dispatch is never handed to a second worker
//!
//! Each fetch pulls no more messages than can run at once, and a fetched batch
//! is always settled before shutdown completes.
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::nats::{NatsWorker, StreamConfig, WorkerConfig};
//!
//! struct Notifications;
//! impl StreamConfig for Notifications {
//!     const STREAM_NAME: &'static str = "NOTIFICATIONS";
//!     const CONSUMER_NAME: &'static str = "notification-email";
//!     const DLQ_STREAM: &'static str = "NOTIFICATIONS_DLQ";
//!     const SUBJECT: &'static str = "announcement.*";
//! }
//!
//! let worker = NatsWorker::new(jetstream, router, WorkerConfig::from_stream::<Notifications>()).await?;
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod dlq;
mod error;
mod health;
pub mod metrics;
mod producer;
mod worker;

pub use config::{StreamConfig, WorkerConfig};
pub use consumer::{Delivery, NatsConsumer, NatsMessage, RawMessage, StreamInfo};
pub use dlq::{DlqEntry, DlqManager};
pub use error::NatsError;
pub use health::{HealthReport, HealthServer, HealthState, InFlight, WorkerStatus};
pub use metrics::{init_metrics, NatsMetrics};
pub use producer::NatsProducer;
pub use worker::NatsWorker;
