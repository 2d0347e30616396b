//! Publish orchestration: composition, retries, attempt records
//!
//! The orchestrator sequences caption generation, target selection and
//! the platform call for one content item. Each HTTP attempt lands in
//! the attempt log; transient and rate-limit failures back off and
//! retry up to the configured bound, auth and validation failures
//! surface immediately.

use std::sync::Arc;

use crate::config::AccountConfig;
use crate::experiment::{HashtagStrategy, PostConfig};
use crate::models::{ContentItem, PublishAttempt};
use crate::storage::{AttemptRepository, ContentRepository};
use crate::utils::retry::RetryConfig;

use super::client::{MediaPost, PlatformClient};
use super::PublishError;

/// Caption generation collaborator.
///
/// Content text generation is external to the pipeline; implementations
/// may template, translate or generate. The default composes the stored
/// caption with hashtags per the configured strategy.
pub trait CaptionSource: Send + Sync {
    fn caption(&self, item: &ContentItem, config: &PostConfig, account: &AccountConfig) -> String;
}

/// Image preparation collaborator.
///
/// Rendering and pixel editing are external to the pipeline; an
/// implementation may re-render the asset in the requested style and
/// return a new URL. The default publishes the stored asset untouched.
pub trait ImageSource: Send + Sync {
    fn media_url(&self, item: &ContentItem, config: &PostConfig) -> String;
}

/// Default image source: the registry URL as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectImageSource;

impl ImageSource for DirectImageSource {
    fn media_url(&self, item: &ContentItem, config: &PostConfig) -> String {
        tracing::trace!(
            content = %item.content_code,
            style = ?config.image_style,
            "publishing stored asset without transform"
        );
        item.media_url.clone()
    }
}

/// Default caption source: stored caption plus strategy-driven hashtags
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCaptionSource;

impl CaptionSource for DefaultCaptionSource {
    fn caption(&self, item: &ContentItem, config: &PostConfig, account: &AccountConfig) -> String {
        let text = item.caption.clone().unwrap_or_default();

        let tags: Vec<String> = match config.hashtag_strategy {
            HashtagStrategy::None => Vec::new(),
            HashtagStrategy::Minimal => vec![format!("#{}", item.source_tag)],
            HashtagStrategy::Full => {
                let mut tags = vec![format!("#{}", item.source_tag)];
                for tag in &account.hashtags {
                    let tag = format!("#{}", tag.trim_start_matches('#'));
                    if !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
                tags
            }
        };

        match (text.is_empty(), tags.is_empty()) {
            (true, true) => String::new(),
            (true, false) => tags.join(" "),
            (false, true) => text,
            (false, false) => format!("{text}\n\n{}", tags.join(" ")),
        }
    }
}

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Fingerprint of the published item
    pub content_code: String,
    /// Platform container id
    pub creation_id: String,
    /// Platform media id
    pub media_id: String,
    /// Number of attempts made, including the successful one
    pub attempts: u32,
}

/// Drives the publish step for one account at a time
pub struct Orchestrator {
    client: PlatformClient,
    content: Arc<dyn ContentRepository>,
    attempts: Arc<dyn AttemptRepository>,
    captions: Arc<dyn CaptionSource>,
    images: Arc<dyn ImageSource>,
    retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        client: PlatformClient,
        content: Arc<dyn ContentRepository>,
        attempts: Arc<dyn AttemptRepository>,
        captions: Arc<dyn CaptionSource>,
        images: Arc<dyn ImageSource>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            content,
            attempts,
            captions,
            images,
            retry,
        }
    }

    /// Publish one item for one account under the given configuration.
    ///
    /// Retries only transient classes, with exponential backoff, up to
    /// the configured attempt bound. Every attempt is recorded. On
    /// success the platform identifiers are attached to the final
    /// attempt record and the item's posted flag is set.
    pub async fn publish(
        &self,
        account: &AccountConfig,
        item: &ContentItem,
        config: &PostConfig,
    ) -> Result<PublishReceipt, PublishError> {
        let post = MediaPost {
            image_url: self.images.media_url(item, config),
            caption: self.captions.caption(item, config, account),
            format: config.format,
        };
        let credentials = account.credentials();
        let max_attempts = self.retry.max_retries + 1;

        let mut last_error: Option<PublishError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt);
                tracing::debug!(
                    account = %account.name,
                    content = %item.content_code,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "retrying publish after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            let record = PublishAttempt::new(&account.name, &item.content_code, attempt);

            match self.client.publish(&credentials, &post).await {
                Ok(outcome) => {
                    self.record(record.succeeded(&outcome.creation_id, &outcome.media_id));
                    self.mark_posted(&item.content_code);

                    tracing::info!(
                        account = %account.name,
                        content = %item.content_code,
                        media_id = %outcome.media_id,
                        attempts = attempt + 1,
                        "published"
                    );
                    return Ok(PublishReceipt {
                        content_code: item.content_code.clone(),
                        creation_id: outcome.creation_id,
                        media_id: outcome.media_id,
                        attempts: attempt + 1,
                    });
                }
                Err(e) => {
                    self.record(record.failed(e.to_string()));

                    if !e.is_retryable() {
                        tracing::warn!(
                            account = %account.name,
                            content = %item.content_code,
                            error = %e,
                            "non-retryable publish failure"
                        );
                        return Err(e);
                    }

                    if matches!(e, PublishError::RateLimit(_)) {
                        tracing::warn!(account = %account.name, "platform rate limit hit");
                    }
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            PublishError::Transient("publish failed with no recorded error".to_string())
        });
        Err(PublishError::Exhausted {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    /// Append to the attempt log; a logging failure never fails the publish
    fn record(&self, attempt: PublishAttempt) {
        if let Err(e) = self.attempts.record(&attempt) {
            tracing::error!(error = %e, "failed to record publish attempt");
        }
    }

    fn mark_posted(&self, content_code: &str) {
        match self.content.mark_posted(content_code) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(content = content_code, "posted item missing from registry");
            }
            Err(e) => {
                tracing::error!(content = content_code, error = %e, "failed to set posted flag");
            }
        }
    }
}
