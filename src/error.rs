//! Unified error handling for the tidecast crate
//!
//! This module provides a unified error type that consolidates all
//! domain-specific errors into a single `Error` enum, while maintaining
//! the ability to use domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`TidecastErrorTrait`] - Common interface implemented by the unified type
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::experiment::ExperimentError;
pub use crate::lock::LockError;
pub use crate::publish::PublishError;
pub use crate::source::SourceError;

/// Common interface for error handling across the crate
pub trait TidecastErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the run can continue or retry)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Concurrency guard hit (an active lock)
    Lock,
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// Authentication and authorization errors
    Auth,
    /// Malformed data or rejected requests
    Validation,
    /// Storage and I/O errors
    Storage,
    /// Experiment engine errors
    Experiment,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the tidecast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Execution lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Source provider errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Platform publish errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Experiment engine errors
    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TidecastErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            // An active lock aborts only this invocation; the next slot retries
            Self::Lock(LockError::Active { .. }) => true,
            Self::Lock(LockError::Io(_)) => false,
            Self::Source(e) => e.is_recoverable(),
            Self::Publish(e) => e.is_retryable(),
            Self::Experiment(_) => false,
            Self::Database(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Lock(_) => ErrorCategory::Lock,
            Self::Source(SourceError::InvalidPayload(_)) => ErrorCategory::Validation,
            Self::Source(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Publish(e) => match e {
                PublishError::Auth(_) => ErrorCategory::Auth,
                PublishError::Validation(_) => ErrorCategory::Validation,
                PublishError::Setup(_) => ErrorCategory::Config,
                _ => ErrorCategory::Network,
            },
            Self::Experiment(ExperimentError::InvalidDefinition(_)) => ErrorCategory::Config,
            Self::Experiment(_) => ErrorCategory::Experiment,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_active_is_recoverable() {
        let err = Error::Lock(LockError::Active {
            name: "publish".into(),
            age_secs: 120,
            timeout_secs: 1800,
        });
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Lock);
    }

    #[test]
    fn test_source_categories() {
        let transient = Error::Source(SourceError::ServerError(503));
        assert!(transient.is_recoverable());
        assert_eq!(transient.category(), ErrorCategory::Network);

        let malformed = Error::Source(SourceError::InvalidPayload("no items".into()));
        assert!(!malformed.is_recoverable());
        assert_eq!(malformed.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_publish_categories() {
        let auth = Error::Publish(PublishError::Auth("expired".into()));
        assert!(!auth.is_recoverable());
        assert_eq!(auth.category(), ErrorCategory::Auth);

        let rate = Error::Publish(PublishError::RateLimit("slow down".into()));
        assert!(rate.is_recoverable());
        assert_eq!(rate.category(), ErrorCategory::Network);

        let invalid = Error::Publish(PublishError::Validation("bad image".into()));
        assert_eq!(invalid.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing api key");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let source_err = SourceError::RateLimit;
        let unified: Error = source_err.into();
        assert!(matches!(unified, Error::Source(_)));
    }
}
