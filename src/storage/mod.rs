//! SQLite-backed persistence for the pipeline
//!
//! Repository traits decouple the pipeline from the storage backend:
//! production uses SQLite (WAL mode, single connection behind a mutex),
//! tests use the in-memory implementations.
//!
//! - [`content`] - deduplication registry of content items
//! - [`attempts`] - append-only log of publish attempts

pub mod attempts;
pub mod content;

pub use attempts::{AttemptRepository, MemoryAttemptRepository, SqliteAttemptRepository};
pub use content::{ContentRepository, ContentStats, MemoryContentRepository, SqliteContentRepository};
