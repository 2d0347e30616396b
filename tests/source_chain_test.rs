//! Integration tests for the provider fallback chain using wiremock
//!
//! These tests validate host ordering, the success heuristic, and the
//! collection path into the dedup registry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tidecast::models::SourceQuery;
use tidecast::source::{ImageFilter, ProviderClient, SourceChain};
use tidecast::storage::{ContentRepository, MemoryContentRepository};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> ProviderClient {
    ProviderClient::new("test-key", 100, Duration::from_secs(10)).unwrap()
}

fn image_item(code: &str) -> serde_json::Value {
    json!({"code": code, "type": "image", "url": format!("https://cdn.example.com/{code}.jpg")})
}

/// Hosts [A, B, C] where A and B are empty and C has items: the result
/// is C's items and exactly 3 provider calls were made, in order.
#[tokio::test]
async fn test_chain_falls_through_to_third_host() {
    let host_a = MockServer::start().await;
    let host_b = MockServer::start().await;
    let host_c = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&host_a)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"items": []}})))
        .expect(1)
        .mount(&host_b)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [image_item("c1"), image_item("c2")]
        })))
        .expect(1)
        .mount(&host_c)
        .await;

    let chain = SourceChain::new(
        client(),
        &host_a.uri(),
        &[host_b.uri(), host_c.uri()],
        Arc::new(ImageFilter),
    );

    let outcome = chain.fetch(&SourceQuery::Hashtag("motivation".into())).await;

    assert_eq!(outcome.calls, 3);
    assert_eq!(outcome.host.as_deref(), Some(host_c.uri().as_str()));
    assert_eq!(outcome.raw_count, 2);
    assert_eq!(outcome.items.len(), 2);
}

/// The first host with items wins; later hosts are never called.
#[tokio::test]
async fn test_chain_stops_at_first_hit() {
    let host_a = MockServer::start().await;
    let host_b = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [image_item("a1")]
        })))
        .expect(1)
        .mount(&host_a)
        .await;

    // Host B must never be called
    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&host_b)
        .await;

    let chain = SourceChain::new(
        client(),
        &host_a.uri(),
        &[host_b.uri()],
        Arc::new(ImageFilter),
    );

    let outcome = chain.fetch(&SourceQuery::Hashtag("motivation".into())).await;
    assert_eq!(outcome.calls, 1);
    assert_eq!(outcome.items.len(), 1);
}

/// A failing host advances the chain instead of aborting the query.
#[tokio::test]
async fn test_chain_survives_server_errors() {
    let host_a = MockServer::start().await;
    let host_b = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&host_a)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [image_item("b1")]
        })))
        .expect(1)
        .mount(&host_b)
        .await;

    let chain = SourceChain::new(
        client(),
        &host_a.uri(),
        &[host_b.uri()],
        Arc::new(ImageFilter),
    );

    let outcome = chain.fetch(&SourceQuery::Hashtag("motivation".into())).await;
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.host.as_deref(), Some(host_b.uri().as_str()));
}

/// All hosts empty: zero items, no panic, run continues.
#[tokio::test]
async fn test_chain_all_hosts_empty_is_not_fatal() {
    let host_a = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&host_a)
        .await;

    let chain = SourceChain::new(client(), &host_a.uri(), &[], Arc::new(ImageFilter));
    let outcome = chain.fetch(&SourceQuery::Hashtag("motivation".into())).await;

    assert!(outcome.items.is_empty());
    assert!(outcome.host.is_none());
    assert!(outcome.last_error.is_none());
}

/// All hosts failing: zero items and the last error is recorded.
#[tokio::test]
async fn test_chain_all_hosts_failed_records_last_error() {
    let host_a = MockServer::start().await;
    let host_b = MockServer::start().await;

    for host in [&host_a, &host_b] {
        Mock::given(method("GET"))
            .and(path("/v1/media"))
            .respond_with(ResponseTemplate::new(500))
            .mount(host)
            .await;
    }

    let chain = SourceChain::new(
        client(),
        &host_a.uri(),
        &[host_b.uri()],
        Arc::new(ImageFilter),
    );

    let outcome = chain.fetch(&SourceQuery::Hashtag("motivation".into())).await;
    assert!(outcome.items.is_empty());
    assert!(outcome.last_error.is_some());
    assert_eq!(outcome.calls, 2);
}

/// The provider call carries the API key header and the query param.
#[tokio::test]
async fn test_provider_request_shape() {
    let host = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .and(header("X-Api-Key", "test-key"))
        .and(query_param("q", "#motivation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [image_item("x")]
        })))
        .expect(1)
        .mount(&host)
        .await;

    let chain = SourceChain::new(client(), &host.uri(), &[], Arc::new(ImageFilter));
    let outcome = chain.fetch(&SourceQuery::Hashtag("motivation".into())).await;
    assert_eq!(outcome.items.len(), 1);
}

/// Collection scenario: query "motivation" against [h1, h2] where h1
/// returns 0 raw items and h2 returns 5 raw with 3 passing the image
/// filter, none pre-existing. Exactly 3 new rows land in the registry.
#[tokio::test]
async fn test_collection_inserts_filtered_items() {
    let h1 = MockServer::start().await;
    let h2 = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&h1)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                image_item("m1"),
                image_item("m2"),
                {"code": "m3", "type": "video", "url": "https://cdn.example.com/m3.mp4"},
                image_item("m4"),
                {"code": "m5", "type": "video", "url": "https://cdn.example.com/m5.mp4"},
            ]
        })))
        .expect(1)
        .mount(&h2)
        .await;

    let chain = SourceChain::new(client(), &h1.uri(), &[h2.uri()], Arc::new(ImageFilter));
    let repo = MemoryContentRepository::new();

    let report = chain
        .collect(&[SourceQuery::Hashtag("motivation".into())], &repo)
        .await;

    assert_eq!(report.queries.len(), 1);
    assert_eq!(report.queries[0].raw_count, 5);
    assert_eq!(report.queries[0].filtered_count, 3);
    assert_eq!(report.queries[0].inserted, 3);
    assert_eq!(repo.stats().unwrap().total, 3);

    // Items carry the query as their source tag
    let item = repo.get("m1").unwrap().unwrap();
    assert_eq!(item.source_tag, "motivation");
    assert!(!item.is_posted);
}

/// Re-collecting the same payload inserts nothing new.
#[tokio::test]
async fn test_collection_is_idempotent() {
    let host = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [image_item("dup")]
        })))
        .mount(&host)
        .await;

    let chain = SourceChain::new(client(), &host.uri(), &[], Arc::new(ImageFilter));
    let repo = MemoryContentRepository::new();
    let queries = [SourceQuery::Hashtag("motivation".into())];

    let first = chain.collect(&queries, &repo).await;
    assert_eq!(first.total_inserted(), 1);

    let second = chain.collect(&queries, &repo).await;
    assert_eq!(second.total_inserted(), 0);
    assert_eq!(repo.stats().unwrap().total, 1);
}
