use thiserror::Error;

/// Errors surfaced by the scoring pipeline.
///
/// `Clone` so that a single in-flight computation can hand the same outcome
/// to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CreditScoreError {
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Chain data gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid transaction record {hash}: {reason}")]
    InvalidRecord { hash: String, reason: String },

    #[error("Feature vector mismatch (missing: {missing:?}, unexpected: {unexpected:?}, duplicated: {duplicated:?})")]
    FeatureMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
        duplicated: Vec<String>,
    },

    #[error("Prompt template error: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CreditScoreError {
    pub fn invalid_record(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        CreditScoreError::InvalidRecord {
            hash: hash.into(),
            reason: reason.into(),
        }
    }

    /// Whether a gateway call that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CreditScoreError::GatewayUnavailable(_))
    }
}

impl From<reqwest::Error> for CreditScoreError {
    fn from(e: reqwest::Error) -> Self {
        CreditScoreError::GatewayUnavailable(format!("HTTP request failed: {}", e))
    }
}

impl From<config::ConfigError> for CreditScoreError {
    fn from(e: config::ConfigError) -> Self {
        CreditScoreError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CreditScoreError>;
