//! Deduplication registry for content items
//!
//! The registry is the sole owner of `content_code` uniqueness. Insertion
//! is atomic (`INSERT OR IGNORE` against the primary key) so a duplicate
//! insert can never create a second row, even with a concurrent writer;
//! a conflict is a no-op, not an error. Insertion is the only mutation
//! path besides the posted flag; rows are never deleted.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::ContentItem;

/// Registry totals
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentStats {
    /// All rows in the registry
    pub total: usize,
    /// Rows already published
    pub posted: usize,
}

impl ContentStats {
    /// Unposted rows waiting for a publish slot
    pub fn backlog(&self) -> usize {
        self.total.saturating_sub(self.posted)
    }
}

/// Repository for the content deduplication registry
pub trait ContentRepository: Send + Sync {
    /// Check whether a fingerprint is already registered
    fn exists(&self, content_code: &str) -> Result<bool>;

    /// Insert the item unless its fingerprint is already registered.
    ///
    /// Returns `true` if a row was inserted, `false` on a duplicate.
    fn insert_if_absent(&self, item: &ContentItem) -> Result<bool>;

    /// Fetch an item by fingerprint
    fn get(&self, content_code: &str) -> Result<Option<ContentItem>>;

    /// Oldest unposted item, optionally restricted to a source tag
    fn next_unposted(&self, source_tag: Option<&str>) -> Result<Option<ContentItem>>;

    /// Set the posted flag; returns `false` for an unknown fingerprint
    fn mark_posted(&self, content_code: &str) -> Result<bool>;

    /// Registry totals
    fn stats(&self) -> Result<ContentStats>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`ContentRepository`]
pub struct SqliteContentRepository {
    conn: Mutex<Connection>,
}

impl SqliteContentRepository {
    /// Open (or create) the registry at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open content registry")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "content registry opened");
        Ok(repo)
    }

    /// Create an in-memory registry (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory registry")?;
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
            CREATE TABLE IF NOT EXISTS content_items (
                content_code TEXT PRIMARY KEY,
                source_tag   TEXT NOT NULL,
                media_url    TEXT NOT NULL,
                caption      TEXT,
                is_posted    INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_content_backlog
                ON content_items(is_posted, created_at);

            CREATE INDEX IF NOT EXISTS idx_content_source_tag
                ON content_items(source_tag);
            "#,
        )?;
        Ok(())
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    let created_at: String = row.get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ContentItem {
        content_code: row.get("content_code")?,
        source_tag: row.get("source_tag")?,
        media_url: row.get("media_url")?,
        caption: row.get("caption")?,
        is_posted: row.get::<_, i64>("is_posted")? != 0,
        created_at,
    })
}

impl ContentRepository for SqliteContentRepository {
    fn exists(&self, content_code: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM content_items WHERE content_code = ?1",
            params![content_code],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_if_absent(&self, item: &ContentItem) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            INSERT OR IGNORE INTO content_items
                (content_code, source_tag, media_url, caption, is_posted, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                item.content_code,
                item.source_tag,
                item.media_url,
                item.caption,
                item.is_posted as i64,
                item.created_at.to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    fn get(&self, content_code: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let item = conn
            .query_row(
                "SELECT * FROM content_items WHERE content_code = ?1",
                params![content_code],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn next_unposted(&self, source_tag: Option<&str>) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let item = match source_tag {
            Some(tag) => conn
                .query_row(
                    r#"
                    SELECT * FROM content_items
                    WHERE is_posted = 0 AND source_tag = ?1
                    ORDER BY created_at ASC LIMIT 1
                    "#,
                    params![tag],
                    row_to_item,
                )
                .optional()?,
            None => conn
                .query_row(
                    r#"
                    SELECT * FROM content_items
                    WHERE is_posted = 0
                    ORDER BY created_at ASC LIMIT 1
                    "#,
                    [],
                    row_to_item,
                )
                .optional()?,
        };
        Ok(item)
    }

    fn mark_posted(&self, content_code: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE content_items SET is_posted = 1 WHERE content_code = ?1",
            params![content_code],
        )?;
        Ok(changed > 0)
    }

    fn stats(&self) -> Result<ContentStats> {
        let conn = self.conn.lock().unwrap();
        let (total, posted): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_posted), 0) FROM content_items",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ContentStats {
            total: total as usize,
            posted: posted as usize,
        })
    }
}

// ============================================================================
// In-Memory Implementation (testing)
// ============================================================================

/// In-memory implementation of [`ContentRepository`] for tests
#[derive(Default)]
pub struct MemoryContentRepository {
    items: Mutex<HashMap<String, ContentItem>>,
}

impl MemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentRepository for MemoryContentRepository {
    fn exists(&self, content_code: &str) -> Result<bool> {
        Ok(self.items.lock().unwrap().contains_key(content_code))
    }

    fn insert_if_absent(&self, item: &ContentItem) -> Result<bool> {
        let mut items = self.items.lock().unwrap();
        if items.contains_key(&item.content_code) {
            return Ok(false);
        }
        items.insert(item.content_code.clone(), item.clone());
        Ok(true)
    }

    fn get(&self, content_code: &str) -> Result<Option<ContentItem>> {
        Ok(self.items.lock().unwrap().get(content_code).cloned())
    }

    fn next_unposted(&self, source_tag: Option<&str>) -> Result<Option<ContentItem>> {
        let items = self.items.lock().unwrap();
        let mut candidates: Vec<_> = items
            .values()
            .filter(|i| !i.is_posted)
            .filter(|i| source_tag.map_or(true, |t| i.source_tag == t))
            .collect();
        candidates.sort_by_key(|i| i.created_at);
        Ok(candidates.first().map(|i| (*i).clone()))
    }

    fn mark_posted(&self, content_code: &str) -> Result<bool> {
        let mut items = self.items.lock().unwrap();
        match items.get_mut(content_code) {
            Some(item) => {
                item.is_posted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> Result<ContentStats> {
        let items = self.items.lock().unwrap();
        Ok(ContentStats {
            total: items.len(),
            posted: items.values().filter(|i| i.is_posted).count(),
        })
    }
}
