//! tidecast - Automated social content pipeline
//!
//! A scheduled publishing system with redundant content sourcing,
//! deduplication and A/B experimentation.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`lock`] - Filesystem execution lock for scheduled runs
//! - [`source`] - Provider client with ordered host fallback
//! - [`storage`] - Deduplication registry and attempt log (SQLite)
//! - [`experiment`] - A/B engine: assignment, analysis, optimizer
//! - [`publish`] - Platform client and publish orchestration
//! - [`notify`] - Best-effort webhook notifications
//! - [`pipeline`] - Per-run composition of the above
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use tidecast::config::Config;
//! use tidecast::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!     let report = pipeline.run_collection().await?;
//!     println!("{} new items", report.total_inserted());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod experiment;
pub mod lock;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod source;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, TidecastErrorTrait};
    pub use crate::experiment::{ExperimentEngine, PostConfig};
    pub use crate::lock::{LockGuard, LockManager};
    pub use crate::models::{ContentItem, PublishAttempt, PublishStatus, SourceQuery};
    pub use crate::pipeline::Pipeline;
    pub use crate::storage::{ContentRepository, SqliteContentRepository};
}

// Direct re-exports for convenience
pub use models::{ContentItem, PublishAttempt, PublishStatus, SourceQuery};
