//! Common messaging abstractions for queue-driven workers.
//!
//! This library provides backend-agnostic building blocks:
//! - **Jobs and processors**: the `Job` payload contract and the `Processor`
//!   trait a worker drives for every delivered message
//! - **Error taxonomy**: `ProcessingError` categories that decide between
//!   acknowledgement, delayed redelivery and dead-lettering
//! - **Bounded retry**: an explicit `retry` combinator with backoff for remote
//!   calls made *inside* a processor
//! - **NATS JetStream** (feature `nats`): pull-consumer worker, DLQ stream,
//!   producer, health server and Prometheus metrics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌──────────────────────┐
//! │ NatsProducer │──▶│ JetStream stream    │──▶│ NatsWorker<J, P>     │
//! └──────────────┘   │ (primary subjects)  │   │  ├─ Processor<J>     │
//!                    └─────────▲───────────┘   │  ├─ ack / nak(delay) │
//!                              │ redelivery    │  └─ term + DLQ entry │
//!                              └───────────────┴──────────┬───────────┘
//!                                                         ▼
//!                                               ┌──────────────────┐
//!                                               │ DLQ stream       │
//!                                               └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{retry, RetryPolicy};
//!
//! let users = retry(&RetryPolicy::default(), |e: &ClientError| e.is_transient(), |_attempt| {
//!     client.list_users(&token)
//! })
//! .await?;
//! ```

mod error;
mod job;
mod processor;
mod retry;

#[cfg(feature = "nats")]
pub mod nats;

pub use error::{ErrorCategory, ProcessingError};
pub use job::Job;
pub use processor::Processor;
pub use retry::{retry, BackoffStrategy, RetryError, RetryPolicy};
