//! User directory lookup and recipient resolution.

use crate::config::DirectoryConfig;
use async_trait::async_trait;
use messaging::{retry, RetryError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

const CUSTOMER_EMAILS_PATH: &str = "/v1/api/users/customers/emails";

/// Longest upstream error body kept in [`DirectoryError::Upstream`].
const MAX_ERROR_BODY: usize = 512;

/// A user record returned by the directory. Unlisted attributes are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "lastName", default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Recipient {
    /// The address to deliver to, if there is one.
    pub fn deliverable_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory responded with {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("directory request failed: {0}")]
    Transport(String),

    #[error("invalid directory response: {0}")]
    Decode(String),

    #[error("bearer token is empty or malformed")]
    InvalidToken,
}

impl DirectoryError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DirectoryError::InvalidToken)
    }
}

/// Remote user directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Customers that have an email address. A `null` body is an empty list.
    async fn list_recipients(&self, token: &str) -> Result<Vec<Recipient>, DirectoryError>;
}

/// [`DirectoryClient`] over HTTP.
#[derive(Clone)]
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    url: String,
}

impl HttpDirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("{}{}", config.base_url.trim_end_matches('/'), CUSTOMER_EMAILS_PATH),
        })
    }
}

fn validate_token(token: &str) -> Result<&str, DirectoryError> {
    let token = token.trim();
    if token.is_empty() || token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DirectoryError::InvalidToken);
    }
    Ok(token)
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_recipients(&self, token: &str) -> Result<Vec<Recipient>, DirectoryError> {
        let token = validate_token(token)?;

        let response = self
            .http
            .get(&self.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(DirectoryError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice::<Option<Vec<Recipient>>>(&body)
            .map(Option::unwrap_or_default)
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

/// Fetches recipients with bounded retry on transient directory failures.
#[derive(Clone)]
pub struct RecipientResolver {
    client: Arc<dyn DirectoryClient>,
    policy: RetryPolicy,
}

impl RecipientResolver {
    pub fn new(client: Arc<dyn DirectoryClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    #[instrument(skip_all)]
    pub async fn resolve(&self, token: &str) -> Result<Vec<Recipient>, RetryError<DirectoryError>> {
        let client = self.client.as_ref();

        let recipients = retry(&self.policy, DirectoryError::is_transient, move |attempt| {
            debug!(attempt, "Fetching recipients from directory");
            client.list_recipients(token)
        })
        .await?;

        info!(count = recipients.len(), "Resolved recipients");
        Ok(recipients)
    }
}
