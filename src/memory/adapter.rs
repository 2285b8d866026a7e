//! Per-tier storage adapter.
//!
//! Each tier pairs one structured store with one vector store. Writes go to
//! both; a write the vector side rejects after the structured side accepted
//! it is rolled back where possible and surfaced as [`Error::PartialWrite`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Backend, Error, Result};

use super::backend::{StructuredStore, VectorStore};
use super::types::{MemoryRecord, MemoryTier, RecordFilter, ScoredRecord};

/// Storage handles of one tier.
#[derive(Clone)]
pub struct TierStorage {
    tier: MemoryTier,
    structured: Arc<dyn StructuredStore>,
    vector: Arc<dyn VectorStore>,
}

impl TierStorage {
    pub fn new(
        tier: MemoryTier,
        structured: Arc<dyn StructuredStore>,
        vector: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            tier,
            structured,
            vector,
        }
    }

    pub fn tier(&self) -> MemoryTier {
        self.tier
    }

    /// Name of the structured table.
    pub fn table_name(&self) -> &str {
        self.structured.name()
    }

    /// Name of the vector collection.
    pub fn collection_name(&self) -> &str {
        self.vector.name()
    }

    fn check(&self, record: &MemoryRecord) -> Result<()> {
        record.validate()?;
        if record.tier != self.tier {
            return Err(Error::validation(format!(
                "record {} belongs to {}, not {}",
                record.key, record.tier, self.tier
            )));
        }
        Ok(())
    }

    /// Write a record to both backends.
    pub async fn save(&self, record: &MemoryRecord) -> Result<()> {
        self.check(record)?;
        self.structured.save(record).await?;

        if let Err(e) = self.vector.save(record).await {
            warn!(key = %record.key, tier = %self.tier, error = %e, "Vector write failed, rolling back");
            if let Err(rollback) = self.structured.delete(&record.key).await {
                warn!(key = %record.key, error = %rollback, "Rollback of structured write failed");
            }
            return Err(Error::partial_write(
                &record.key,
                Backend::Structured,
                Backend::Vector,
                e.to_string(),
            ));
        }

        debug!(key = %record.key, tier = %self.tier, context_type = %record.context_type, "Saved record");
        Ok(())
    }

    /// Replace a record stored under the same key. If the new version
    /// cannot be written the previous one is put back.
    pub async fn replace(&self, record: &MemoryRecord) -> Result<()> {
        self.check(record)?;
        let previous = self.structured.get(&record.key).await?;
        self.delete(&record.key).await?;

        if let Err(e) = self.save(record).await {
            if let Some(previous) = previous {
                self.restore(&previous).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort rewrite of a record a failed replace removed. The
    /// structured copy goes first so point lookups keep working.
    async fn restore(&self, previous: &MemoryRecord) {
        if let Err(e) = self.structured.save(previous).await {
            warn!(key = %previous.key, error = %e, "Could not restore previous record");
            return;
        }
        if let Err(e) = self.vector.save(previous).await {
            warn!(key = %previous.key, error = %e, "Restored record is missing from the vector store");
        }
    }

    /// Point lookup in the structured store.
    pub async fn get(&self, key: &str) -> Result<Option<MemoryRecord>> {
        self.structured.get(key).await
    }

    /// Attribute search in insertion order.
    pub async fn search_structured(
        &self,
        filter: &RecordFilter,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        self.structured.search(filter, limit, session_id).await
    }

    /// Similarity search. `session_id == None` reads across sessions.
    pub async fn search_vector(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
        score_threshold: f64,
        session_id: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        let mut hits = self
            .vector
            .search(query, filter, limit, score_threshold, session_id)
            .await?;
        for hit in &mut hits {
            hit.retrieved_from_layer = Some(self.tier);
        }
        Ok(hits)
    }

    /// Delete a key from both backends. Returns whether it existed in either.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let structured = self.structured.delete(key).await?;
        let vector = self.vector.delete(key).await?;
        Ok(structured || vector)
    }

    /// Bump the access counter of a key.
    pub async fn record_access(&self, key: &str) -> Result<()> {
        self.structured.record_access(key).await
    }

    /// Records created strictly before `cutoff`.
    pub async fn list_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        self.structured.list_before(cutoff, limit).await
    }

    /// Delete records created before `cutoff`, returning the
    /// (structured, vector) deletion counts.
    pub async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<(usize, usize)> {
        let structured = self.structured.delete_before(cutoff).await?;
        let vector = self.vector.delete_before(cutoff).await?;
        Ok((structured, vector))
    }

    /// Record counts as (structured, vector).
    pub async fn counts(&self) -> Result<(usize, usize)> {
        let structured = self.structured.count().await?;
        let vector = self.vector.count().await?;
        Ok((structured, vector))
    }
}

impl std::fmt::Debug for TierStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierStorage")
            .field("tier", &self.tier)
            .field("table", &self.structured.name())
            .field("collection", &self.vector.name())
            .finish()
    }
}
