use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure of a single LLM call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited,

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    #[error("bad request (HTTP {status})")]
    BadRequest { status: u16 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Transient errors are retried against the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::Network(_)
                | ProviderError::RateLimited
                | ProviderError::Server { .. }
        )
    }

    /// Classifies a non-success HTTP status. Returns `None` for 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        let code = status.as_u16();
        match code {
            _ if status.is_success() => None,
            401 | 403 => Some(ProviderError::Auth { status: code }),
            429 => Some(ProviderError::RateLimited),
            _ if status.is_client_error() => Some(ProviderError::BadRequest { status: code }),
            _ if status.is_server_error() => Some(ProviderError::Server { status: code }),
            _ => Some(ProviderError::InvalidResponse(format!("unexpected HTTP {}", code))),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if let Some(error) = e.status().and_then(ProviderError::from_status) {
            error
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// A text-completion backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError>;
}

/// A provider together with the name reported in `provider_used`.
#[derive(Clone)]
pub struct ProviderHandle {
    pub name: String,
    pub provider: Arc<dyn LlmProvider>,
}

impl ProviderHandle {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle").field("name", &self.name).finish()
    }
}

/// Sends a request and decodes a JSON body, classifying HTTP failures.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await?;
    if let Some(error) = ProviderError::from_status(response.status()) {
        return Err(error);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}
