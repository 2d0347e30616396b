//! Best-effort notification channel
//!
//! Notifications are a side channel: a delivery failure is logged and
//! swallowed here, never escalated into a pipeline failure. The webhook
//! implementation POSTs a JSON payload and retries only transport and
//! server errors.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::retry::{with_retry_if, RetryConfig};

/// Best-effort message sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message; returns whether delivery succeeded
    async fn send(&self, message: &str) -> bool;
}

/// Notifier used when no channel is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, message: &str) -> bool {
        tracing::debug!(message, "notification dropped (no channel configured)");
        false
    }
}

/// Webhook channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,

    /// Optional authentication token (sent as Bearer token)
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    2
}

impl WebhookConfig {
    /// Create a new webhook configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Webhook notification channel
///
/// Sends messages as JSON payloads via HTTP POST requests.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
    retry: RetryConfig,
}

impl WebhookNotifier {
    /// Create a new webhook notifier
    pub fn new(config: WebhookConfig) -> Result<Self, String> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        let retry = RetryConfig::new(config.max_retries);

        Ok(Self {
            config,
            client,
            retry,
        })
    }

    /// The webhook URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_payload(&self, message: &str) -> serde_json::Value {
        serde_json::json!({
            "source": "tidecast",
            "text": message,
            "sent_at": Utc::now().to_rfc3339(),
        })
    }

    async fn deliver(&self, payload: &serde_json::Value) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.config.url);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unreadable body".to_string());

        if status.is_client_error() {
            // Tagged so the retry predicate stops immediately
            anyhow::bail!("webhook rejected (no retry): HTTP {status}: {body}");
        }
        anyhow::bail!("HTTP {status}: {body}");
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> bool {
        let payload = self.build_payload(message);

        let result = with_retry_if(
            &self.retry,
            || async { self.deliver(&payload).await },
            |e| !e.to_string().contains("(no retry)"),
        )
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(url = %self.config.url, "notification delivered");
                true
            }
            Err(e) => {
                tracing::warn!(url = %self.config.url, error = %e, "notification failed");
                false
            }
        }
    }
}
