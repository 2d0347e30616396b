//! Ordered host fallback chain and collection into the registry
//!
//! Mirrored provider hosts are tried in order, one call per host per
//! query. The first host that returns a non-empty payload (raw or
//! filtered) wins and iteration stops. When every host fails or comes
//! back empty the query yields zero items; the last error is recorded on
//! the report but the run continues with the next query.

use std::sync::Arc;

use crate::models::{CollectionReport, ContentItem, QueryReport, SourceQuery};
use crate::storage::ContentRepository;

use super::provider::{ItemFilter, ProviderClient, RawItem};
use super::SourceError;

/// Result of walking the chain for one query
#[derive(Debug, Default)]
pub struct ChainOutcome {
    /// Host that answered with items, if any
    pub host: Option<String>,

    /// Raw item count reported by the winning host
    pub raw_count: usize,

    /// Filtered items from the winning host
    pub items: Vec<RawItem>,

    /// Number of provider calls made
    pub calls: usize,

    /// Last error seen, when the chain came up empty
    pub last_error: Option<SourceError>,
}

/// Source client walking an ordered list of mirrored provider hosts
pub struct SourceChain {
    client: ProviderClient,
    hosts: Vec<String>,
    filter: Arc<dyn ItemFilter>,
}

impl SourceChain {
    /// Build a chain from a primary host and ordered alternates.
    ///
    /// Alternates duplicating an earlier entry are dropped, preserving
    /// order.
    pub fn new(
        client: ProviderClient,
        primary: &str,
        alternates: &[String],
        filter: Arc<dyn ItemFilter>,
    ) -> Self {
        let mut hosts = vec![primary.to_string()];
        for host in alternates {
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }

        Self {
            client,
            hosts,
            filter,
        }
    }

    /// Hosts in chain order
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Walk the chain for one query.
    ///
    /// Never fails: an empty outcome with `last_error` set is the worst
    /// case.
    pub async fn fetch(&self, query: &SourceQuery) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        for host in &self.hosts {
            outcome.calls += 1;

            match self.client.fetch(host, query).await {
                Ok(payload) => {
                    let raw_count = payload.raw_count;
                    let filtered = self.filter.filter(payload.items);

                    if raw_count > 0 || !filtered.is_empty() {
                        tracing::debug!(
                            host = %host,
                            query = %query,
                            raw = raw_count,
                            filtered = filtered.len(),
                            "host answered with items"
                        );
                        outcome.host = Some(host.clone());
                        outcome.raw_count = raw_count;
                        outcome.items = filtered;
                        return outcome;
                    }

                    tracing::debug!(host = %host, query = %query, "host returned empty payload");
                }
                Err(SourceError::RateLimit) => {
                    // Logged distinctly for capacity planning
                    tracing::warn!(host = %host, query = %query, "provider rate limit hit");
                    outcome.last_error = Some(SourceError::RateLimit);
                }
                Err(e) => {
                    tracing::warn!(host = %host, query = %query, error = %e, "host failed");
                    outcome.last_error = Some(e);
                }
            }
        }

        outcome
    }

    /// Run a sequence of queries and insert new items into the registry.
    ///
    /// Queries run sequentially; a failing query never aborts the batch.
    pub async fn collect(
        &self,
        queries: &[SourceQuery],
        repo: &dyn ContentRepository,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();

        for query in queries {
            let outcome = self.fetch(query).await;
            let mut entry = QueryReport {
                query: query.to_string(),
                host: outcome.host.clone(),
                raw_count: outcome.raw_count,
                filtered_count: outcome.items.len(),
                error: outcome.last_error.as_ref().map(|e| e.to_string()),
                ..Default::default()
            };

            for raw in outcome.items {
                match self.register(query, raw, repo) {
                    Ok(true) => entry.inserted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(query = %query, error = %e, "failed to register item");
                    }
                }
            }

            tracing::info!(
                query = %query,
                host = ?entry.host,
                raw = entry.raw_count,
                filtered = entry.filtered_count,
                inserted = entry.inserted,
                "query collected"
            );
            report.queries.push(entry);
        }

        report
    }

    /// Turn a raw item into a registry row tagged with the query.
    ///
    /// Returns `Ok(true)` when a new row was inserted.
    fn register(
        &self,
        query: &SourceQuery,
        raw: RawItem,
        repo: &dyn ContentRepository,
    ) -> anyhow::Result<bool> {
        let media_url = match raw.media_url {
            Some(url) if !url.is_empty() => url,
            _ => return Ok(false), // filter guarantees this, defend anyway
        };

        let content_code = raw
            .code
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ContentItem::fingerprint(&media_url));

        let mut item = ContentItem::new(&content_code, query.as_tag(), &media_url);
        if let Some(caption) = raw.caption {
            item = item.with_caption(caption);
        }

        repo.insert_if_absent(&item)
    }
}
