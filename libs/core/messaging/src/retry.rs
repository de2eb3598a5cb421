//! Bounded retry with backoff for remote calls.
//!
//! `retry` wraps a fallible async operation and re-runs it while the error is
//! classified as retriable and the attempt budget is not spent. The caller
//! supplies the classification, so a client-side validation failure can stop
//! the loop on the first attempt while network errors are retried.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: how many attempts in total and how long to wait between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (values below 1 are treated as 1)
    pub max_attempts: u32,

    /// Delay schedule between attempts
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// Create a policy from its parts.
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Exponential policy: `initial`, `initial * multiplier`, ... capped at 5 minutes.
    pub fn exponential(max_attempts: u32, initial: Duration, multiplier: u32) -> Self {
        Self::new(
            max_attempts,
            BackoffStrategy::Exponential {
                initial,
                multiplier,
                max: Duration::from_secs(300),
            },
        )
    }

    /// Delay to wait before the given 1-based attempt; `None` for the first one.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            None
        } else {
            Some(self.backoff.delay(attempt - 2))
        }
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 2s then 4s.
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(2), 2)
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed(Duration),

    /// `initial * multiplier^retry`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: u32,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay after the `retry`-th failure (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential {
                initial,
                multiplier,
                max,
            } => initial
                .saturating_mul(multiplier.saturating_pow(retry))
                .min(*max),
        }
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retriable error
    Exhausted { attempts: u32, last_error: E },

    /// An attempt failed with an error the predicate refused to retry
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The error of the final attempt.
    pub fn error(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted { error, .. } => error,
        }
    }

    /// Consume and return the error of the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            RetryError::Aborted { attempts, error } => {
                write!(f, "not retriable (attempt {}): {}", attempts, error)
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error())
    }
}

/// Run `operation` until it succeeds, the error is not retriable, or the
/// policy's attempt budget is spent.
///
/// `operation` receives the 1-based attempt number. Between attempts the task
/// sleeps for the policy's backoff delay.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut is_retriable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !is_retriable(&error) => {
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                let delay = policy.backoff.delay(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
