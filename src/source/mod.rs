//! Candidate content acquisition from mirrored source providers
//!
//! The provider API is served from several redundant hosts; the
//! [`chain::SourceChain`] walks them in order and stops at the first host
//! that returns usable items. Host failures are never fatal for the run:
//! the chain records the last error and moves to the next query.
//!
//! - [`provider`] - HTTP client for one provider host
//! - [`chain`] - ordered host fallback + collection into the registry

pub mod chain;
pub mod provider;

pub use chain::{ChainOutcome, SourceChain};
pub use provider::{ImageFilter, ItemFilter, ProviderClient, ProviderPayload, RawItem};

use thiserror::Error;

/// Errors raised while talking to a source provider host
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Provider rate limit hit (429); logged distinctly for capacity planning
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Unexpected non-retryable status
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Response body did not match any known payload shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl SourceError {
    /// Whether the next host in the chain could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout | Self::RateLimit | Self::ServerError(_)
        )
    }
}
