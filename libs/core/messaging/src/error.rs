//! Error types for message processing.

use std::fmt;
use thiserror::Error;

/// Error categories determine what the worker does with the message.
///
/// - **Transient**: redeliver after the configured delay, until the delivery
///   budget is spent; then dead-letter
/// - **Permanent**: dead-letter immediately and terminate the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (broker hiccup, dependency briefly unavailable)
    Transient,

    /// The message can never succeed (poison payload, protocol violation)
    Permanent,
}

impl ErrorCategory {
    /// Whether a message that failed on its `delivery_count`-th delivery should
    /// be handed back to the broker for another attempt.
    pub fn should_redeliver(&self, delivery_count: u32, max_deliver: u32) -> bool {
        match self {
            ErrorCategory::Transient => delivery_count < max_deliver,
            ErrorCategory::Permanent => false,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error returned by a `Processor`.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Transient error, the message is worth redelivering
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Permanent error, the message goes to the dead letter stream
    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProcessingError {
    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient error with a source.
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    /// Create a permanent error with a source.
    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::Transient { .. } => ErrorCategory::Transient,
            ProcessingError::Permanent { .. } => ErrorCategory::Permanent,
            ProcessingError::Serialization(_) => ErrorCategory::Permanent,
            ProcessingError::Config(_) => ErrorCategory::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_category() {
        let transient = ProcessingError::transient("broker unavailable");
        assert_eq!(transient.category(), ErrorCategory::Transient);

        let permanent = ProcessingError::permanent("missing event type");
        assert_eq!(permanent.category(), ErrorCategory::Permanent);

        let serialization =
            ProcessingError::from(serde_json::from_str::<u32>("\"nope\"").unwrap_err());
        assert_eq!(serialization.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_transient_redelivers_until_budget_is_spent() {
        assert!(ErrorCategory::Transient.should_redeliver(1, 5));
        assert!(ErrorCategory::Transient.should_redeliver(4, 5));
        assert!(!ErrorCategory::Transient.should_redeliver(5, 5));
    }

    #[test]
    fn test_permanent_never_redelivers() {
        assert!(!ErrorCategory::Permanent.should_redeliver(1, 5));
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ProcessingError::permanent_with_source("cannot read", io);
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "disk gone");
    }
}
