//! Fault-tolerant publishing against the platform API
//!
//! Publishing is a two-step call (create a media container, then publish
//! it) driven by the orchestrator with bounded retries. Only transient
//! classes (server errors, timeouts, rate limits) are retried;
//! authentication and validation failures surface immediately and are
//! never retried. Every attempt is recorded in the attempt log.
//!
//! - [`client`] - platform HTTP client with error classification
//! - [`orchestrator`] - post composition, retry loop, attempt records

pub mod client;
pub mod orchestrator;

pub use client::{MediaPost, PlatformClient, PlatformCredentials, PublishOutcome};
pub use orchestrator::{
    CaptionSource, DefaultCaptionSource, DirectImageSource, ImageSource, Orchestrator,
    PublishReceipt,
};

use thiserror::Error;

/// Errors raised by the publish step, classified by cause.
///
/// The caller acts on the class: auth failures skip the account for the
/// run, exhausted retries require notification and manual follow-up.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Invalid or expired credential; fatal for the account this run
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Platform rate limit; retryable, logged distinctly
    #[error("rate limited by platform: {0}")]
    RateLimit(String),

    /// Request rejected as malformed; not retryable
    #[error("validation rejected: {0}")]
    Validation(String),

    /// Server error, timeout or transport failure; retryable
    #[error("transient platform error: {0}")]
    Transient(String),

    /// Bounded retries exhausted on a retryable class
    #[error("publish failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<PublishError>,
    },

    /// HTTP client could not be constructed
    #[error("client setup failed: {0}")]
    Setup(String),
}

impl PublishError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit(_) | Self::Transient(_))
    }
}
