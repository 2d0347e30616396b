//! End-to-end pipeline tests: configuration in, runs out

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tidecast::config::Config;
use tidecast::error::{Error, LockError};
use tidecast::lock::LockManager;
use tidecast::pipeline::Pipeline;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("tidecast.db");
    config.lock.dir = dir.path().join("locks");
    config.source.api_key = "test-key".to_string();
    config
}

#[tokio::test]
async fn test_collection_through_pipeline() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"code": "p1", "type": "image", "url": "https://cdn.example.com/p1.jpg"},
                {"code": "p2", "type": "image", "url": "https://cdn.example.com/p2.jpg"},
            ]
        })))
        .mount(&server)
        .await;

    let mut config = base_config(&dir);
    config.source.primary_host = server.uri();
    config.source.queries = vec!["#motivation".to_string()];

    let pipeline = Pipeline::from_config(config).unwrap();
    let report = pipeline.run_collection().await.unwrap();

    assert_eq!(report.total_inserted(), 2);

    let stats = pipeline.stats().unwrap();
    assert_eq!(stats.content.total, 2);
    assert_eq!(stats.content.backlog(), 2);

    // Lock released: a second run acquires cleanly
    let second = pipeline.run_collection().await.unwrap();
    assert_eq!(second.total_inserted(), 0);
}

#[tokio::test]
async fn test_publish_run_without_accounts_is_empty() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::from_config(base_config(&dir)).unwrap();

    let summary = pipeline.run_publish(None).await.unwrap();
    assert!(summary.published.is_empty());
    assert!(summary.skipped.is_empty());
    assert!(summary.failed.is_empty());
}

#[tokio::test]
async fn test_held_lock_blocks_run() {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir);
    let lock_dir = config.lock.dir.clone();
    let pipeline = Pipeline::from_config(config).unwrap();

    // Another invocation holds the publish lock
    let manager = LockManager::new(&lock_dir).unwrap();
    let _guard = manager
        .acquire("publish", Duration::from_secs(1800))
        .unwrap();

    let result = pipeline.run_publish(None).await;
    assert!(matches!(
        result,
        Err(Error::Lock(LockError::Active { .. }))
    ));

    // The collect lock is independent
    assert!(pipeline.run_collection().await.is_ok());
}

#[tokio::test]
async fn test_outcome_recording_and_analysis_via_pipeline() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);

    let experiment_toml = r#"
        id = "caption_style"
        name = "Caption style"
        metric = "engagement_rate"
        start_time = "2026-07-01T00:00:00Z"

        [[variants]]
        id = "plain"

        [[variants]]
        id = "bold"
    "#;
    config.experiments = vec![toml::from_str(experiment_toml).unwrap()];
    config.optimizer.min_samples = 2;
    config.optimizer.min_duration_hours = 1;

    let pipeline = Pipeline::from_config(config).unwrap();

    // Metrics arrive asynchronously, keyed only by experiment + post;
    // the variant is re-derived from the deterministic assignment.
    for i in 0..6 {
        pipeline
            .record_outcome("caption_style", &format!("post-{i}"), "engagement_rate", 0.4)
            .unwrap();
    }

    let analysis = pipeline.engine().analyze("caption_style").unwrap();
    let recorded: usize = analysis.variants.iter().map(|v| v.samples).sum();
    assert_eq!(recorded, 6);

    // Unknown experiment surfaces as an experiment error
    assert!(pipeline
        .record_outcome("nope", "post-1", "engagement_rate", 0.4)
        .is_err());
}

#[tokio::test]
async fn test_lock_cleanup_via_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = base_config(&dir);
    let lock_dir = config.lock.dir.clone();
    let pipeline = Pipeline::from_config(config).unwrap();

    std::fs::create_dir_all(&lock_dir).unwrap();
    let stale = chrono::Utc::now().timestamp() - 7200;
    std::fs::write(lock_dir.join("crashed.lock"), stale.to_string()).unwrap();

    let removed = pipeline.cleanup_locks(Duration::from_secs(3600)).unwrap();
    assert_eq!(removed, 1);
}

#[test]
fn test_invalid_config_is_rejected_at_build() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.source.primary_host = "not a url".to_string();

    assert!(Pipeline::from_config(config).is_err());
}
