//! Filesystem execution lock for mutually-exclusive scheduled runs
//!
//! Each scheduled invocation runs as a short-lived process; the only
//! cross-invocation exclusion mechanism is a named lock backed by a shared
//! filesystem directory. One file per lock name, containing a single
//! integer unix timestamp of acquisition; absence of the file means
//! unlocked.
//!
//! A lock older than its timeout is stale and reclaimable by any caller.
//! Release is tied to [`LockGuard`] drop so it fires on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use tidecast::lock::LockManager;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), tidecast::lock::LockError> {
//! let manager = LockManager::new("/var/run/tidecast")?;
//! let guard = manager.acquire("publish", Duration::from_secs(1800))?;
//! // ... do the run ...
//! drop(guard); // released here, or on any early return / panic unwind
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

/// Errors raised by the lock guard
#[derive(Debug, Error)]
pub enum LockError {
    /// An active (non-stale) lock for the name already exists.
    ///
    /// This is an expected concurrency guard hit: the invocation aborts,
    /// the application has not failed.
    #[error("lock '{name}' is held (age {age_secs}s, timeout {timeout_secs}s)")]
    Active {
        name: String,
        age_secs: i64,
        timeout_secs: u64,
    },

    /// Filesystem error while touching the lock directory
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Manager for a directory of named lock files
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    /// Create a manager, creating the lock directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, LockError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Acquire the named lock.
    ///
    /// Fails with [`LockError::Active`] if an existing lock for `name` is
    /// younger than `timeout`; a stale lock is reclaimed (overwritten).
    /// Re-acquisition before release always fails: this is exclusion, not
    /// reentrancy.
    pub fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let path = self.lock_path(name);

        if let Some(acquired_at) = read_lock_timestamp(&path) {
            let age_secs = Utc::now().timestamp() - acquired_at;
            if age_secs >= 0 && (age_secs as u64) < timeout.as_secs() {
                return Err(LockError::Active {
                    name: name.to_string(),
                    age_secs,
                    timeout_secs: timeout.as_secs(),
                });
            }
            tracing::warn!(name, age_secs, "reclaiming stale lock");
        }

        fs::write(&path, Utc::now().timestamp().to_string())?;
        tracing::debug!(name, path = %path.display(), "lock acquired");

        Ok(LockGuard {
            name: name.to_string(),
            path,
            released: false,
        })
    }

    /// Delete every lock older than `stale_after`, returning the count.
    ///
    /// Defensive reaper for crashed processes that never released; runs
    /// independently of the acquire/release cycle.
    pub fn cleanup(&self, stale_after: Duration) -> Result<usize, LockError> {
        let now = Utc::now().timestamp();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let stale = match read_lock_timestamp(&path) {
                Some(ts) => now - ts >= stale_after.as_secs() as i64,
                // Unreadable contents cannot prove the lock is live
                None => true,
            };

            if stale {
                fs::remove_file(&path)?;
                removed += 1;
                tracing::info!(path = %path.display(), "removed stale lock");
            }
        }

        Ok(removed)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }
}

/// Read the acquisition timestamp from a lock file.
///
/// Returns `None` for a missing or unparsable file; an unparsable lock
/// counts as stale.
fn read_lock_timestamp(path: &Path) -> Option<i64> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse::<i64>().ok()
}

/// RAII handle for an acquired lock.
///
/// Releasing is idempotent; the lock file is removed on explicit
/// [`release`](LockGuard::release) or on drop, whichever comes first.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Name of the held lock
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock now instead of at drop
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = fs::remove_file(&self.path) {
            // Already reaped or reclaimed; nothing left to hold
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(name = %self.name, error = %e, "failed to remove lock file");
            }
        } else {
            tracing::debug!(name = %self.name, "lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
