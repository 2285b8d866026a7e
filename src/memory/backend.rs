//! Contracts required from the structured and vector backends.
//!
//! Any store providing atomic single-key writes can sit behind a tier. The
//! crate ships SQLite implementations of both in [`super::sqlite`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::types::{MemoryRecord, RecordFilter, ScoredRecord};

/// Search limit meaning "every matching record".
pub const UNBOUNDED: usize = usize::MAX >> 1;

/// Key/attribute store used for point lookups and filtered scans.
#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Insert a record. Writing an existing key is an error.
    async fn save(&self, record: &MemoryRecord) -> Result<()>;

    /// Point lookup.
    async fn get(&self, key: &str) -> Result<Option<MemoryRecord>>;

    /// Attribute search in insertion order. `session_id` restricts hits to
    /// one session when set.
    async fn search(
        &self,
        filter: &RecordFilter,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>>;

    /// Delete one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Records created strictly before `cutoff`.
    async fn list_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Delete records created strictly before `cutoff`.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Bump the access counter of a key.
    async fn record_access(&self, key: &str) -> Result<()>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    /// Backing table name.
    fn name(&self) -> &str;
}

/// Similarity store. Embeds record text itself.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and insert a record. Writing an existing key is an error.
    async fn save(&self, record: &MemoryRecord) -> Result<()>;

    /// Records most similar to `query` scoring at least `score_threshold`,
    /// best first. `session_id == None` searches across sessions.
    async fn search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
        score_threshold: f64,
        session_id: Option<&str>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Delete one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete records created strictly before `cutoff`.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Number of stored vectors.
    async fn count(&self) -> Result<usize>;

    /// Backing collection name.
    fn name(&self) -> &str;
}

/// Text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded next to stored vectors.
    fn model(&self) -> &str;

    /// Output dimensionality.
    fn dimensions(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
