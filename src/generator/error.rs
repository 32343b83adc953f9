//! Provider error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors from a question-generation provider
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeneratorError {
    /// Provider asked us to slow down (HTTP 429)
    #[error("Rate limited by provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The request exceeded the provider timeout
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success status other than 401/403/429
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Credentials rejected or missing
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider is configured in a way that can never succeed
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// Response body could not be read as question content
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// No generator registered under this provider code
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl GeneratorError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GeneratorError::RateLimited { .. } | GeneratorError::Timeout | GeneratorError::Network(_) => true,
            GeneratorError::Api { status, .. } => *status == 408 || (500..600).contains(status),
            GeneratorError::Auth(_)
            | GeneratorError::InvalidConfig(_)
            | GeneratorError::MalformedResponse(_)
            | GeneratorError::UnknownProvider(_) => false,
        }
    }

    /// Provider-suggested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GeneratorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GeneratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeneratorError::Timeout
        } else if err.is_decode() {
            GeneratorError::MalformedResponse(err.to_string())
        } else {
            GeneratorError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GeneratorError {
    fn from(err: serde_json::Error) -> Self {
        GeneratorError::MalformedResponse(err.to_string())
    }
}
