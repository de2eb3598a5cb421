//! Environment-driven configuration for the notification pipeline.

use core_config::{env_or_default, env_parse_or, env_required, ConfigError, FromEnv};
use messaging::RetryPolicy;
use std::time::Duration;

/// Fan-out settings for a single dispatch.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Prepended to the announcement title
    pub subject_prefix: String,
    /// Upper bound for a single provider call
    pub send_timeout: Duration,
    /// Sends in flight at once
    pub send_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "Novo Aviso: ".to_string(),
            send_timeout: Duration::from_secs(10),
            send_concurrency: 4,
        }
    }
}

impl FromEnv for DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            subject_prefix: env_or_default("EMAIL_SUBJECT_PREFIX", &defaults.subject_prefix),
            send_timeout: Duration::from_secs(env_parse_or("EMAIL_SEND_TIMEOUT_SECS", 10)?),
            send_concurrency: env_parse_or("EMAIL_SEND_CONCURRENCY", defaults.send_concurrency)?
                .max(1),
        })
    }
}

/// Footer values injected into every rendered template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandingConfig {
    pub contact: String,
    pub website_url: String,
    pub contact_url: String,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            contact: "contato@gmail.com".to_string(),
            website_url: "IrmãosPelluci.com".to_string(),
            contact_url: "contato@contato".to_string(),
        }
    }
}

impl FromEnv for BrandingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            contact: env_or_default("CONTACT_EMAIL", &defaults.contact),
            website_url: env_or_default("WEBSITE_URL", &defaults.website_url),
            contact_url: env_or_default("CONTACT_URL", &defaults.contact_url),
        })
    }
}

/// User directory endpoint and retry budget.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Base URL, e.g. `http://main-service:8080`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl DirectoryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl FromEnv for DirectoryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts: u32 = env_parse_or("DIRECTORY_MAX_ATTEMPTS", 3)?;
        let backoff_ms: u64 = env_parse_or("DIRECTORY_BACKOFF_MS", 2000)?;
        let multiplier: u32 = env_parse_or("DIRECTORY_BACKOFF_MULTIPLIER", 2)?;

        Ok(Self {
            base_url: env_required("DIRECTORY_SERVICE_URL")?,
            timeout: Duration::from_secs(env_parse_or("DIRECTORY_TIMEOUT_SECS", 5)?),
            retry: RetryPolicy::exponential(
                max_attempts,
                Duration::from_millis(backoff_ms),
                multiplier,
            ),
        })
    }
}
