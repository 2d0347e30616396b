//! HTTP client for a single source provider host
//!
//! The provider exposes `GET /v1/media?q=<query>` authenticated with an
//! API key header. Mirrored deployments return the same data under
//! different hosts but are not consistent about the payload envelope:
//! candidate items arrive nested under `data.items`, `items`, or
//! `results`. The client normalizes all three shapes.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::Deserialize;

use super::SourceError;
use crate::models::SourceQuery;

/// Header carrying the provider API key
const API_KEY_HEADER: &str = "X-Api-Key";

/// One candidate item as the provider serializes it
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    /// Provider-side identifier, when present
    #[serde(default, alias = "id", alias = "shortcode")]
    pub code: Option<String>,

    /// Media kind ("image", "video", ...)
    #[serde(default, alias = "type")]
    pub media_type: Option<String>,

    /// URL of the media asset
    #[serde(default, alias = "url", alias = "display_url")]
    pub media_url: Option<String>,

    /// Caption text, when present
    #[serde(default)]
    pub caption: Option<String>,
}

/// Normalized provider response
#[derive(Debug, Clone, Default)]
pub struct ProviderPayload {
    /// Item count in the raw payload, before any filtering
    pub raw_count: usize,

    /// Items that deserialized cleanly
    pub items: Vec<RawItem>,
}

/// Filter deciding which raw items are usable
///
/// Filtering is an external collaborator of the pipeline; the default
/// [`ImageFilter`] keeps image-typed items that carry a media URL.
pub trait ItemFilter: Send + Sync {
    fn filter(&self, raw: Vec<RawItem>) -> Vec<RawItem>;
}

/// Default filter: image-typed items with a non-empty media URL
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFilter;

impl ItemFilter for ImageFilter {
    fn filter(&self, raw: Vec<RawItem>) -> Vec<RawItem> {
        raw.into_iter()
            .filter(|item| {
                item.media_type
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case("image"))
                    .unwrap_or(false)
            })
            .filter(|item| item.media_url.as_deref().map(|u| !u.is_empty()).unwrap_or(false))
            .collect()
    }
}

/// Rate-limited HTTP client for the provider API
///
/// The host is chosen per call; host selection drives the fallback chain.
pub struct ProviderClient {
    client: Client,
    api_key: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ProviderClient {
    /// Create a client with the given API key and request timeout
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Http` if the HTTP client cannot be created
    pub fn new(
        api_key: &str,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap());
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            rate_limiter,
        })
    }

    /// Fetch candidates for a query from one host.
    ///
    /// Exactly one provider call per invocation; retrying across hosts is
    /// the chain's responsibility, not the client's.
    pub async fn fetch(
        &self,
        host: &str,
        query: &SourceQuery,
    ) -> Result<ProviderPayload, SourceError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/v1/media", host.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("q", query.as_param())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Http(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimit);
        }
        if status.is_server_error() {
            return Err(SourceError::ServerError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::InvalidPayload(e.to_string())
            }
        })?;

        parse_payload(&body)
    }
}

/// Extract the item array from one of the known payload envelopes
///
/// Tried in order: `data.items`, `items`, `results`.
fn item_array(body: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    body.pointer("/data/items")
        .or_else(|| body.get("items"))
        .or_else(|| body.get("results"))
        .and_then(|v| v.as_array())
}

/// Normalize a provider response body
///
/// A malformed element is skipped (logged), never fatal for the batch;
/// an unrecognizable envelope is an invalid payload for this host.
pub fn parse_payload(body: &serde_json::Value) -> Result<ProviderPayload, SourceError> {
    let array = item_array(body).ok_or_else(|| {
        SourceError::InvalidPayload("no item array under data.items, items, or results".into())
    })?;

    let raw_count = array.len();
    let mut items = Vec::with_capacity(raw_count);

    for value in array {
        match serde_json::from_value::<RawItem>(value.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed candidate item");
            }
        }
    }

    Ok(ProviderPayload { raw_count, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_data_items_shape() {
        let body = json!({
            "data": {
                "items": [
                    {"code": "a1", "type": "image", "url": "https://cdn/x.jpg"},
                    {"code": "a2", "type": "video", "url": "https://cdn/y.mp4"}
                ]
            }
        });

        let payload = parse_payload(&body).unwrap();
        assert_eq!(payload.raw_count, 2);
        assert_eq!(payload.items[0].code.as_deref(), Some("a1"));
        assert_eq!(payload.items[0].media_url.as_deref(), Some("https://cdn/x.jpg"));
    }

    #[test]
    fn test_parse_items_shape() {
        let body = json!({
            "items": [{"id": "b1", "media_type": "image", "media_url": "https://cdn/z.jpg"}]
        });

        let payload = parse_payload(&body).unwrap();
        assert_eq!(payload.raw_count, 1);
        assert_eq!(payload.items[0].code.as_deref(), Some("b1"));
        assert_eq!(payload.items[0].media_type.as_deref(), Some("image"));
    }

    #[test]
    fn test_parse_results_shape() {
        let body = json!({
            "results": [{"shortcode": "c1", "type": "image", "display_url": "https://cdn/w.jpg"}]
        });

        let payload = parse_payload(&body).unwrap();
        assert_eq!(payload.raw_count, 1);
        assert_eq!(payload.items[0].code.as_deref(), Some("c1"));
    }

    #[test]
    fn test_parse_unknown_envelope() {
        let body = json!({"stuff": []});
        assert!(matches!(
            parse_payload(&body),
            Err(SourceError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_skips_malformed_elements() {
        let body = json!({
            "items": [
                {"code": "ok", "type": "image", "url": "https://cdn/a.jpg"},
                {"code": 42}
            ]
        });

        let payload = parse_payload(&body).unwrap();
        // Raw count reflects the wire payload, items only the clean ones
        assert_eq!(payload.raw_count, 2);
        assert_eq!(payload.items.len(), 1);
    }

    #[test]
    fn test_image_filter() {
        let raw = vec![
            RawItem {
                code: Some("a".into()),
                media_type: Some("image".into()),
                media_url: Some("https://cdn/a.jpg".into()),
                caption: None,
            },
            RawItem {
                code: Some("b".into()),
                media_type: Some("video".into()),
                media_url: Some("https://cdn/b.mp4".into()),
                caption: None,
            },
            RawItem {
                code: Some("c".into()),
                media_type: Some("IMAGE".into()),
                media_url: Some("https://cdn/c.jpg".into()),
                caption: None,
            },
            RawItem {
                code: Some("d".into()),
                media_type: Some("image".into()),
                media_url: None,
                caption: None,
            },
        ];

        let filtered = ImageFilter.filter(raw);
        let codes: Vec<_> = filtered.iter().filter_map(|i| i.code.as_deref()).collect();
        assert_eq!(codes, vec!["a", "c"]);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(SourceError::Timeout.is_recoverable());
        assert!(SourceError::RateLimit.is_recoverable());
        assert!(SourceError::ServerError(503).is_recoverable());
        assert!(!SourceError::Status(404).is_recoverable());
        assert!(!SourceError::InvalidPayload("bad".into()).is_recoverable());
    }
}
