//! Integration tests for the execution lock lifecycle

use std::fs;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tidecast::lock::{LockError, LockManager};

/// Lock "job_a" with a 30-minute timeout acquired at t0: a second
/// acquire at t0+5m fails with an active-lock error; an acquire at
/// t0+31m succeeds.
#[test]
fn test_thirty_minute_lock_scenario() {
    let dir = TempDir::new().unwrap();
    let manager = LockManager::new(dir.path()).unwrap();
    let timeout = Duration::from_secs(30 * 60);
    let lock_file = dir.path().join("job_a.lock");

    // t0: acquired
    let guard = manager.acquire("job_a", timeout).unwrap();
    assert_eq!(guard.name(), "job_a");

    // t0 + 5m: still active
    let five_min_ago = Utc::now().timestamp() - 5 * 60;
    fs::write(&lock_file, five_min_ago.to_string()).unwrap();
    match manager.acquire("job_a", timeout) {
        Err(LockError::Active {
            name,
            age_secs,
            timeout_secs,
        }) => {
            assert_eq!(name, "job_a");
            assert!((5 * 60..30 * 60).contains(&(age_secs as u64)));
            assert_eq!(timeout_secs, 30 * 60);
        }
        other => panic!("expected LockError::Active, got {other:?}"),
    }

    // t0 + 31m: stale, reclaimed
    let thirty_one_min_ago = Utc::now().timestamp() - 31 * 60;
    fs::write(&lock_file, thirty_one_min_ago.to_string()).unwrap();
    assert!(manager.acquire("job_a", timeout).is_ok());
}

/// The guard releases on every exit path, including a panic unwind.
#[test]
fn test_release_fires_on_panic_unwind() {
    let dir = TempDir::new().unwrap();
    let manager = LockManager::new(dir.path()).unwrap();
    let path = dir.path().join("job_a.lock");

    let result = std::panic::catch_unwind(|| {
        let _guard = manager.acquire("job_a", Duration::from_secs(60)).unwrap();
        assert!(path.exists());
        panic!("simulated crash mid-run");
    });

    assert!(result.is_err());
    assert!(!path.exists(), "lock must be released on unwind");
}

/// The lock file contract: a single integer unix timestamp.
#[test]
fn test_lock_file_contents() {
    let dir = TempDir::new().unwrap();
    let manager = LockManager::new(dir.path()).unwrap();

    let before = Utc::now().timestamp();
    let _guard = manager.acquire("job_a", Duration::from_secs(60)).unwrap();
    let after = Utc::now().timestamp();

    let contents = fs::read_to_string(dir.path().join("job_a.lock")).unwrap();
    let ts: i64 = contents.trim().parse().unwrap();
    assert!((before..=after).contains(&ts));
}

/// Cleanup reaps stale locks without touching held ones.
#[test]
fn test_cleanup_is_independent_of_acquire_release() {
    let dir = TempDir::new().unwrap();
    let manager = LockManager::new(dir.path()).unwrap();

    let _held = manager.acquire("held", Duration::from_secs(3600)).unwrap();

    // A crashed process left this one behind two hours ago
    let crashed_ts = Utc::now().timestamp() - 7200;
    fs::write(dir.path().join("crashed.lock"), crashed_ts.to_string()).unwrap();

    let removed = manager.cleanup(Duration::from_secs(3600)).unwrap();
    assert_eq!(removed, 1);
    assert!(dir.path().join("held.lock").exists());
    assert!(!dir.path().join("crashed.lock").exists());
}
