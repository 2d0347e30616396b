//! Platform HTTP client
//!
//! The platform publishes in two steps: `POST /{account}/media` creates a
//! media container, `POST /{account}/media_publish` makes it live. Both
//! carry a bearer access token and a business-account identifier. Failure
//! responses are classified into auth / rate-limit / validation /
//! transient so the orchestrator can decide what to retry.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::PublishError;
use crate::experiment::PostFormat;

/// Credentials for one business account
#[derive(Debug, Clone)]
pub struct PlatformCredentials {
    /// Business-account identifier
    pub account_id: String,
    /// Access token
    pub access_token: String,
}

/// Payload for one post
#[derive(Debug, Clone, Serialize)]
pub struct MediaPost {
    /// URL of the media asset
    pub image_url: String,
    /// Caption text including hashtags
    pub caption: String,
    /// Feed or story
    #[serde(skip)]
    pub format: PostFormat,
}

/// Identifiers returned by a successful publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// Container id from the creation step
    pub creation_id: String,
    /// Media id from the publish step
    pub media_id: String,
}

/// HTTP client for the platform publish API
pub struct PlatformClient {
    client: Client,
    base_url: String,
}

impl PlatformClient {
    /// Create a client against the given API base URL.
    ///
    /// Publish calls may involve server-side media processing; timeouts
    /// of 60-120s are expected here, unlike the short collection calls.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// One full publish attempt: create the container, then publish it.
    pub async fn publish(
        &self,
        credentials: &PlatformCredentials,
        post: &MediaPost,
    ) -> Result<PublishOutcome, PublishError> {
        let creation_id = self.create_container(credentials, post).await?;
        let media_id = self.publish_container(credentials, &creation_id).await?;

        Ok(PublishOutcome {
            creation_id,
            media_id,
        })
    }

    /// Step 1: create the media container
    pub async fn create_container(
        &self,
        credentials: &PlatformCredentials,
        post: &MediaPost,
    ) -> Result<String, PublishError> {
        let url = format!("{}/{}/media", self.base_url, credentials.account_id);

        let mut body = serde_json::json!({
            "image_url": post.image_url,
            "caption": post.caption,
        });
        if post.format == PostFormat::Story {
            body["media_type"] = serde_json::Value::String("STORIES".to_string());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        extract_id(response).await
    }

    /// Step 2: publish the container
    pub async fn publish_container(
        &self,
        credentials: &PlatformCredentials,
        creation_id: &str,
    ) -> Result<String, PublishError> {
        let url = format!("{}/{}/media_publish", self.base_url, credentials.account_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&serde_json::json!({ "creation_id": creation_id }))
            .send()
            .await
            .map_err(transport_error)?;

        extract_id(response).await
    }
}

/// Map transport failures onto the transient class
fn transport_error(e: reqwest::Error) -> PublishError {
    if e.is_timeout() {
        PublishError::Transient("request timeout".to_string())
    } else {
        PublishError::Transient(e.to_string())
    }
}

/// Read the `id` out of a success response, or classify the failure
async fn extract_id(response: reqwest::Response) -> Result<String, PublishError> {
    let status = response.status();
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) if status.is_success() => {
            return Err(PublishError::Transient(format!("unreadable response: {e}")));
        }
        Err(_) => serde_json::Value::Null,
    };

    if status.is_success() {
        return body
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::Validation("success response carried no id".to_string())
            });
    }

    Err(classify_failure(status, &body))
}

/// Classify a failure response from status code and platform error body.
///
/// The platform reports errors as `{"error": {"message", "type", "code"}}`;
/// `OAuthException` and 401/403 mean the credential is invalid or expired,
/// error code 4 and 429 mean rate limiting.
fn classify_failure(status: StatusCode, body: &serde_json::Value) -> PublishError {
    let error = body.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("no error message")
        .to_string();
    let error_type = error
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    let code = error.and_then(|e| e.get("code")).and_then(|c| c.as_i64());

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || error_type == "OAuthException"
    {
        return PublishError::Auth(message);
    }
    if status == StatusCode::TOO_MANY_REQUESTS || code == Some(4) {
        return PublishError::RateLimit(message);
    }
    if status.is_server_error() {
        return PublishError::Transient(format!("{}: {message}", status.as_u16()));
    }

    PublishError::Validation(format!("{}: {message}", status.as_u16()))
}
