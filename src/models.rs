// Core data structures for the tidecast pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A candidate content item pulled from a source provider.
///
/// Items are created by the source client, deduplicated by `content_code`
/// in the registry, and flipped to `is_posted` by the publish orchestrator.
/// Items are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable fingerprint, globally unique in the registry
    pub content_code: String,
    /// Hashtag or username that produced this item
    pub source_tag: String,
    /// URL of the media asset
    pub media_url: String,
    /// Caption text carried by the provider, if any
    pub caption: Option<String>,
    /// Whether this item has been published
    pub is_posted: bool,
    /// When the item entered the registry
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    /// Create a new unposted item with the current timestamp
    pub fn new(content_code: &str, source_tag: &str, media_url: &str) -> Self {
        Self {
            content_code: content_code.to_string(),
            source_tag: source_tag.to_string(),
            media_url: media_url.to_string(),
            caption: None,
            is_posted: false,
            created_at: Utc::now(),
        }
    }

    /// Set the caption
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Derive a stable fingerprint from a media URL using SHA-256
    ///
    /// Used when the provider payload carries no code of its own.
    pub fn fingerprint(media_url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(media_url.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A query against the source provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceQuery {
    /// Fetch candidates tagged with a hashtag
    Hashtag(String),
    /// Fetch candidates posted by a username
    Username(String),
}

impl SourceQuery {
    /// The tag assigned to items produced by this query
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Hashtag(tag) => tag,
            Self::Username(name) => name,
        }
    }

    /// Query-string value sent to the provider
    pub fn as_param(&self) -> String {
        match self {
            Self::Hashtag(tag) => format!("#{tag}"),
            Self::Username(name) => format!("@{name}"),
        }
    }

    /// Parse from a config string: `#tag` / `@user` / bare tag
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('@') {
            Some(name) => Self::Username(name.to_string()),
            None => Self::Hashtag(s.strip_prefix('#').unwrap_or(s).to_string()),
        }
    }
}

impl std::fmt::Display for SourceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_param())
    }
}

/// Status of a single publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishStatus {
    Pending,
    Success,
    Failed,
}

impl PublishStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Pending => "pending",
            PublishStatus::Success => "success",
            PublishStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PublishStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "pending" => PublishStatus::Pending,
            "success" => PublishStatus::Success,
            _ => PublishStatus::Failed,
        })
    }
}

/// Record of one publish call against the platform API
///
/// One record per HTTP attempt; terminal once `Success` or retries are
/// exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttempt {
    /// Attempt identifier
    pub id: String,
    /// Account the post was published for
    pub account: String,
    /// Fingerprint of the content item being published
    pub content_code: String,
    /// Outcome of this attempt
    pub status: PublishStatus,
    /// Zero-based index of this attempt within the retry loop
    pub retry_count: u32,
    /// Error message when the attempt failed
    pub last_error: Option<String>,
    /// Platform container id, attached on success
    pub creation_id: Option<String>,
    /// Platform media id, attached on success
    pub media_id: Option<String>,
    /// When the attempt was made
    pub created_at: DateTime<Utc>,
}

impl PublishAttempt {
    /// Create a new pending attempt
    pub fn new(account: &str, content_code: &str, retry_count: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account: account.to_string(),
            content_code: content_code.to_string(),
            status: PublishStatus::Pending,
            retry_count,
            last_error: None,
            creation_id: None,
            media_id: None,
            created_at: Utc::now(),
        }
    }

    /// Mark as failed with an error message
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = PublishStatus::Failed;
        self.last_error = Some(error.into());
        self
    }

    /// Mark as successful with the platform identifiers
    pub fn succeeded(mut self, creation_id: &str, media_id: &str) -> Self {
        self.status = PublishStatus::Success;
        self.creation_id = Some(creation_id.to_string());
        self.media_id = Some(media_id.to_string());
        self
    }
}

/// Per-query result of a collection run
#[derive(Debug, Clone, Default)]
pub struct QueryReport {
    /// The query that was executed
    pub query: String,
    /// Host that answered, if any
    pub host: Option<String>,
    /// Items in the raw provider payload
    pub raw_count: usize,
    /// Items surviving the image filter
    pub filtered_count: usize,
    /// New rows inserted into the registry
    pub inserted: usize,
    /// Last error seen across the chain, if the query yielded nothing
    pub error: Option<String>,
}

/// Summary of a collection run across all queries
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub queries: Vec<QueryReport>,
}

impl CollectionReport {
    /// Total new rows inserted across all queries
    pub fn total_inserted(&self) -> usize {
        self.queries.iter().map(|q| q.inserted).sum()
    }

    /// Queries that yielded nothing and recorded an error
    pub fn failed_queries(&self) -> usize {
        self.queries
            .iter()
            .filter(|q| q.inserted == 0 && q.error.is_some())
            .count()
    }
}
