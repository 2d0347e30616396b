//! Append-only log of publish attempts
//!
//! Every call against the platform API is recorded here, one row per HTTP
//! attempt. Rows are never updated or deleted; the publish orchestrator is
//! the only writer.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{PublishAttempt, PublishStatus};

/// Repository for the publish attempt log
pub trait AttemptRepository: Send + Sync {
    /// Append an attempt record
    fn record(&self, attempt: &PublishAttempt) -> Result<()>;

    /// All attempts for a content item, oldest first
    fn attempts_for(&self, content_code: &str) -> Result<Vec<PublishAttempt>>;

    /// Counts by terminal status: (total, success, failed)
    fn counts(&self) -> Result<(usize, usize, usize)>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`AttemptRepository`]
pub struct SqliteAttemptRepository {
    conn: Mutex<Connection>,
}

impl SqliteAttemptRepository {
    /// Open (or create) the attempt log at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open attempt log")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    /// Create an in-memory attempt log (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory log")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS publish_attempts (
                id           TEXT PRIMARY KEY,
                account      TEXT NOT NULL,
                content_code TEXT NOT NULL,
                status       TEXT NOT NULL,
                retry_count  INTEGER NOT NULL,
                last_error   TEXT,
                creation_id  TEXT,
                media_id     TEXT,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_content
                ON publish_attempts(content_code);

            CREATE INDEX IF NOT EXISTS idx_attempts_account
                ON publish_attempts(account, created_at);
            "#,
        )?;
        Ok(())
    }
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<PublishAttempt> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(PublishAttempt {
        id: row.get("id")?,
        account: row.get("account")?,
        content_code: row.get("content_code")?,
        status: status.parse().unwrap_or(PublishStatus::Failed),
        retry_count: row.get("retry_count")?,
        last_error: row.get("last_error")?,
        creation_id: row.get("creation_id")?,
        media_id: row.get("media_id")?,
        created_at,
    })
}

impl AttemptRepository for SqliteAttemptRepository {
    fn record(&self, attempt: &PublishAttempt) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO publish_attempts
                (id, account, content_code, status, retry_count,
                 last_error, creation_id, media_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                attempt.id,
                attempt.account,
                attempt.content_code,
                attempt.status.as_str(),
                attempt.retry_count,
                attempt.last_error,
                attempt.creation_id,
                attempt.media_id,
                attempt.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to record publish attempt")?;
        Ok(())
    }

    fn attempts_for(&self, content_code: &str) -> Result<Vec<PublishAttempt>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM publish_attempts
            WHERE content_code = ?1
            ORDER BY created_at ASC, retry_count ASC
            "#,
        )?;

        let attempts = stmt
            .query_map(params![content_code], row_to_attempt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    fn counts(&self) -> Result<(usize, usize, usize)> {
        let conn = self.conn.lock().unwrap();
        let (total, success, failed): (i64, i64, i64) = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(status = 'success'), 0),
                COALESCE(SUM(status = 'failed'), 0)
            FROM publish_attempts
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok((total as usize, success as usize, failed as usize))
    }
}

// ============================================================================
// In-Memory Implementation (testing)
// ============================================================================

/// In-memory implementation of [`AttemptRepository`] for tests
#[derive(Default)]
pub struct MemoryAttemptRepository {
    attempts: Mutex<Vec<PublishAttempt>>,
}

impl MemoryAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptRepository for MemoryAttemptRepository {
    fn record(&self, attempt: &PublishAttempt) -> Result<()> {
        self.attempts.lock().unwrap().push(attempt.clone());
        Ok(())
    }

    fn attempts_for(&self, content_code: &str) -> Result<Vec<PublishAttempt>> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.content_code == content_code)
            .cloned()
            .collect())
    }

    fn counts(&self) -> Result<(usize, usize, usize)> {
        let attempts = self.attempts.lock().unwrap();
        let success = attempts
            .iter()
            .filter(|a| a.status == PublishStatus::Success)
            .count();
        let failed = attempts
            .iter()
            .filter(|a| a.status == PublishStatus::Failed)
            .count();
        Ok((attempts.len(), success, failed))
    }
}
