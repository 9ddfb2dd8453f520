//! Client error types.

use reqwest::StatusCode;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success response; `detail` and `code` come from the error body.
    #[error("Coordinator returned {status}: {detail}")]
    Api {
        status: StatusCode,
        code: Option<String>,
        detail: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }

    /// Network failures, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    /// Short description suitable for a job or clip error field.
    pub fn detail(&self) -> String {
        match self {
            Self::Api { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ClientError {
        ClientError::Api {
            status: StatusCode::from_u16(status).unwrap(),
            code: None,
            detail: "x".into(),
        }
    }

    #[test]
    fn test_retry_classification() {
        assert!(api(503).is_retryable());
        assert!(api(429).is_retryable());
        assert!(!api(409).is_retryable());
        assert!(!api(404).is_retryable());
        assert!(!ClientError::config("x").is_retryable());
    }

    #[test]
    fn test_status_helpers() {
        assert!(api(404).is_not_found());
        assert!(api(409).is_conflict());
        assert_eq!(api(409).detail(), "x");
    }
}
