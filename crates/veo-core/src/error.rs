//! Error types for VEO core

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use veo_types::{ProviderKind, ValidationError};

/// Errors that can occur in VEO core
#[derive(Debug, Error)]
pub enum VeoError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {key}: {message}")]
    Config { key: String, message: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Video encoding failed: {0}")]
    Encode(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("All providers failed: {}", FailureList(.0))]
    AllProvidersFailed(Vec<ProviderFailure>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl VeoError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            VeoError::Network(_) | VeoError::Timeout(_) => true,
            VeoError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        VeoError::Config {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for VeoError {
    fn from(error: serde_json::Error) -> Self {
        VeoError::Serialization(error.to_string())
    }
}

impl From<tokio::task::JoinError> for VeoError {
    fn from(error: tokio::task::JoinError) -> Self {
        VeoError::Task(error.to_string())
    }
}

/// One provider's error inside an exhausted fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: String,
}

struct FailureList<'a>(&'a [ProviderFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.provider, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VeoError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(VeoError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(VeoError::Api {
            status: 429,
            message: "quota".into()
        }
        .is_retryable());
        assert!(!VeoError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!VeoError::OperationFailed("nope".into()).is_retryable());
    }

    #[test]
    fn test_all_providers_failed_lists_each_provider() {
        let err = VeoError::AllProvidersFailed(vec![
            ProviderFailure {
                provider: ProviderKind::Veo,
                error: "quota exceeded".into(),
            },
            ProviderFailure {
                provider: ProviderKind::Svd,
                error: "server down".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "All providers failed: veo: quota exceeded; svd: server down"
        );
    }
}
