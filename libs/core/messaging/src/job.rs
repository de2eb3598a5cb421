//! Job trait for queue payloads.

use serde::{de::DeserializeOwned, Serialize};

/// A message payload that a worker can decode, process and dead-letter.
///
/// Redelivery bookkeeping lives in the broker (JetStream tracks the delivery
/// count per message), so the payload only has to identify itself for logs
/// and dead-letter entries.
///
/// # Example
///
/// ```rust
/// use messaging::Job;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Ping {
///     id: u64,
/// }
///
/// impl Job for Ping {
///     fn job_id(&self) -> String {
///         self.id.to_string()
///     }
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// A stable identifier used in logs and dead-letter entries.
    fn job_id(&self) -> String;
}
