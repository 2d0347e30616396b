//! Persistence for experiment outcomes, promotions and engine state
//!
//! Outcomes are append-only; the only mutable columns live in the
//! promotion table (rollback flag) and the key/value state used by the
//! optimizer's interval gate and the promoted defaults.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::model::{OutcomeRecord, PromotionRecord};

/// Store owned by the experiment engine
pub trait ExperimentStore: Send + Sync {
    /// Append an outcome record; prior records are never mutated
    fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()>;

    /// All outcomes for an experiment and metric, oldest first
    fn outcomes(&self, experiment_id: &str, metric_name: &str) -> Result<Vec<OutcomeRecord>>;

    /// Outcomes for one variant recorded after `since`
    fn outcomes_since(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>>;

    /// Record a promotion (one per experiment)
    fn record_promotion(&self, promotion: &PromotionRecord) -> Result<()>;

    /// All promotions, oldest first
    fn promotions(&self) -> Result<Vec<PromotionRecord>>;

    /// Flag a promotion for rollback; returns `false` if unknown
    fn flag_rollback(&self, experiment_id: &str) -> Result<bool>;

    /// Persist a state value (optimizer gate, promoted defaults, ...)
    fn save_state(&self, key: &str, value: &str) -> Result<()>;

    /// Load a state value
    fn load_state(&self, key: &str) -> Result<Option<String>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`ExperimentStore`]
pub struct SqliteExperimentStore {
    conn: Mutex<Connection>,
}

impl SqliteExperimentStore {
    /// Open (or create) the store at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open experiment store")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory store")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS outcomes (
                experiment_id TEXT NOT NULL,
                variant_id    TEXT NOT NULL,
                post_id       TEXT NOT NULL,
                metric_name   TEXT NOT NULL,
                metric_value  REAL NOT NULL,
                recorded_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_outcomes_experiment
                ON outcomes(experiment_id, metric_name);

            CREATE TABLE IF NOT EXISTS promotions (
                experiment_id    TEXT PRIMARY KEY,
                variant_id       TEXT NOT NULL,
                promoted_at      TEXT NOT NULL,
                baseline_metric  REAL NOT NULL,
                rollback_flagged INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS engine_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

fn parse_ts(column: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomeRecord> {
    Ok(OutcomeRecord {
        experiment_id: row.get("experiment_id")?,
        variant_id: row.get("variant_id")?,
        post_id: row.get("post_id")?,
        metric_name: row.get("metric_name")?,
        metric_value: row.get("metric_value")?,
        recorded_at: parse_ts(5, row.get("recorded_at")?)?,
    })
}

fn row_to_promotion(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromotionRecord> {
    Ok(PromotionRecord {
        experiment_id: row.get("experiment_id")?,
        variant_id: row.get("variant_id")?,
        promoted_at: parse_ts(2, row.get("promoted_at")?)?,
        baseline_metric: row.get("baseline_metric")?,
        rollback_flagged: row.get::<_, i64>("rollback_flagged")? != 0,
    })
}

impl ExperimentStore for SqliteExperimentStore {
    fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO outcomes
                (experiment_id, variant_id, post_id, metric_name, metric_value, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                outcome.experiment_id,
                outcome.variant_id,
                outcome.post_id,
                outcome.metric_name,
                outcome.metric_value,
                outcome.recorded_at.to_rfc3339(),
            ],
        )
        .context("Failed to record outcome")?;
        Ok(())
    }

    fn outcomes(&self, experiment_id: &str, metric_name: &str) -> Result<Vec<OutcomeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM outcomes
            WHERE experiment_id = ?1 AND metric_name = ?2
            ORDER BY recorded_at ASC
            "#,
        )?;
        let outcomes = stmt
            .query_map(params![experiment_id, metric_name], row_to_outcome)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(outcomes)
    }

    fn outcomes_since(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM outcomes
            WHERE experiment_id = ?1 AND variant_id = ?2
              AND metric_name = ?3 AND recorded_at > ?4
            ORDER BY recorded_at ASC
            "#,
        )?;
        let outcomes = stmt
            .query_map(
                params![experiment_id, variant_id, metric_name, since.to_rfc3339()],
                row_to_outcome,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(outcomes)
    }

    fn record_promotion(&self, promotion: &PromotionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO promotions
                (experiment_id, variant_id, promoted_at, baseline_metric, rollback_flagged)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                promotion.experiment_id,
                promotion.variant_id,
                promotion.promoted_at.to_rfc3339(),
                promotion.baseline_metric,
                promotion.rollback_flagged as i64,
            ],
        )
        .context("Failed to record promotion")?;
        Ok(())
    }

    fn promotions(&self) -> Result<Vec<PromotionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM promotions ORDER BY promoted_at ASC")?;
        let promotions = stmt
            .query_map([], row_to_promotion)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(promotions)
    }

    fn flag_rollback(&self, experiment_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE promotions SET rollback_flagged = 1 WHERE experiment_id = ?1",
            params![experiment_id],
        )?;
        Ok(changed > 0)
    }

    fn save_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO engine_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn load_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM engine_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

// ============================================================================
// In-Memory Implementation (testing)
// ============================================================================

/// In-memory implementation of [`ExperimentStore`] for tests
#[derive(Default)]
pub struct MemoryExperimentStore {
    outcomes: Mutex<Vec<OutcomeRecord>>,
    promotions: Mutex<Vec<PromotionRecord>>,
    state: Mutex<HashMap<String, String>>,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExperimentStore for MemoryExperimentStore {
    fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        self.outcomes.lock().unwrap().push(outcome.clone());
        Ok(())
    }

    fn outcomes(&self, experiment_id: &str, metric_name: &str) -> Result<Vec<OutcomeRecord>> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.experiment_id == experiment_id && o.metric_name == metric_name)
            .cloned()
            .collect())
    }

    fn outcomes_since(
        &self,
        experiment_id: &str,
        variant_id: &str,
        metric_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| {
                o.experiment_id == experiment_id
                    && o.variant_id == variant_id
                    && o.metric_name == metric_name
                    && o.recorded_at > since
            })
            .cloned()
            .collect())
    }

    fn record_promotion(&self, promotion: &PromotionRecord) -> Result<()> {
        let mut promotions = self.promotions.lock().unwrap();
        promotions.retain(|p| p.experiment_id != promotion.experiment_id);
        promotions.push(promotion.clone());
        Ok(())
    }

    fn promotions(&self) -> Result<Vec<PromotionRecord>> {
        Ok(self.promotions.lock().unwrap().clone())
    }

    fn flag_rollback(&self, experiment_id: &str) -> Result<bool> {
        let mut promotions = self.promotions.lock().unwrap();
        match promotions
            .iter_mut()
            .find(|p| p.experiment_id == experiment_id)
        {
            Some(p) => {
                p.rollback_flagged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn save_state(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_append_only() {
        let store = SqliteExperimentStore::in_memory().unwrap();

        store
            .record_outcome(&OutcomeRecord::new("exp", "a", "p1", "engagement_rate", 0.5))
            .unwrap();
        store
            .record_outcome(&OutcomeRecord::new("exp", "b", "p2", "engagement_rate", 0.7))
            .unwrap();
        store
            .record_outcome(&OutcomeRecord::new("exp", "a", "p3", "likes", 12.0))
            .unwrap();

        let outcomes = store.outcomes("exp", "engagement_rate").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].variant_id, "a");
    }

    #[test]
    fn test_outcomes_since_filters() {
        let store = SqliteExperimentStore::in_memory().unwrap();
        let cutoff = Utc::now() - chrono::Duration::hours(1);

        let mut old = OutcomeRecord::new("exp", "a", "p1", "m", 1.0);
        old.recorded_at = Utc::now() - chrono::Duration::hours(2);
        store.record_outcome(&old).unwrap();
        store
            .record_outcome(&OutcomeRecord::new("exp", "a", "p2", "m", 2.0))
            .unwrap();

        let recent = store.outcomes_since("exp", "a", "m", cutoff).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].post_id, "p2");
    }

    #[test]
    fn test_promotion_and_rollback_flag() {
        let store = SqliteExperimentStore::in_memory().unwrap();

        store
            .record_promotion(&PromotionRecord::new("exp", "winner", 0.8))
            .unwrap();

        let promotions = store.promotions().unwrap();
        assert_eq!(promotions.len(), 1);
        assert!(!promotions[0].rollback_flagged);

        assert!(store.flag_rollback("exp").unwrap());
        assert!(!store.flag_rollback("other").unwrap());

        let promotions = store.promotions().unwrap();
        assert!(promotions[0].rollback_flagged);
    }

    #[test]
    fn test_state_roundtrip() {
        let store = SqliteExperimentStore::in_memory().unwrap();

        assert!(store.load_state("k").unwrap().is_none());
        store.save_state("k", "v1").unwrap();
        store.save_state("k", "v2").unwrap();
        assert_eq!(store.load_state("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_memory_store_matches_sqlite() {
        let store = MemoryExperimentStore::new();

        store
            .record_outcome(&OutcomeRecord::new("exp", "a", "p1", "m", 1.0))
            .unwrap();
        assert_eq!(store.outcomes("exp", "m").unwrap().len(), 1);

        store
            .record_promotion(&PromotionRecord::new("exp", "a", 1.0))
            .unwrap();
        assert!(store.flag_rollback("exp").unwrap());
        assert!(store.promotions().unwrap()[0].rollback_flagged);

        store.save_state("k", "v").unwrap();
        assert_eq!(store.load_state("k").unwrap().as_deref(), Some("v"));
    }
}
