//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for evaluation operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Evaluation error types
#[derive(Error, Debug)]
pub enum EvalError {
    /// The tool process could not be started or the handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Model endpoint signalled rate limiting
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-supplied wait before the next attempt
        retry_after: Option<Duration>,
    },

    /// Model endpoint rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Model endpoint returned an error status
    #[error("Provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    /// Model endpoint could not be reached or returned an unreadable body
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool call failed on the channel or returned a malformed response
    #[error("Tool invocation error: {0}")]
    ToolInvocation(String),

    /// Conversation exceeded the configured step limit
    #[error("Maximum steps ({0}) reached")]
    MaxSteps(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl EvalError {
    /// Build a rate-limit error with an optional server hint
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Check if error is retryable.
    ///
    /// Only rate limiting is retried; every other failure is terminal for the call.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-supplied wait hint, if this is a rate-limit error
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the run must stop before any conversation starts
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<anyhow::Error> for EvalError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_is_retryable() {
        assert!(EvalError::rate_limited("slow down", None).is_retryable());
        assert!(!EvalError::ToolInvocation("boom".into()).is_retryable());
        assert!(!EvalError::Provider { status: 500, message: "oops".into() }.is_retryable());
        assert!(!EvalError::ProviderUnavailable("reset".into()).is_retryable());
    }

    #[test]
    fn retry_after_hint() {
        let err = EvalError::rate_limited("429", Some(Duration::from_secs(2)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(EvalError::Auth("nope".into()).retry_after(), None);
    }
}
