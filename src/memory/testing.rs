//! Test backends shared by the memory module tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

use super::adapter::TierStorage;
use super::backend::{StructuredStore, VectorStore};
use super::embedding::HashingEmbedder;
use super::sqlite::SqliteDatabase;
use super::types::{MemoryRecord, MemoryTier, RecordFilter, ScoredRecord};

/// In-memory SQLite storage for one tier.
pub fn sqlite_tier(tier: MemoryTier) -> TierStorage {
    let db = SqliteDatabase::in_memory().unwrap();
    let embedder = Arc::new(HashingEmbedder::new(256).unwrap());
    TierStorage::new(
        tier,
        Arc::new(db.structured_store(&format!("memories_{}", tier)).unwrap()),
        Arc::new(db.vector_store(&format!("vectors_{}", tier), embedder).unwrap()),
    )
}

/// SQLite storage whose vector store fails the `fail_save_on`-th save and
/// the `fail_search_on`-th search (1-based).
pub fn flaky_tier(
    tier: MemoryTier,
    fail_save_on: Option<usize>,
    fail_search_on: Option<usize>,
) -> TierStorage {
    let db = SqliteDatabase::in_memory().unwrap();
    let embedder = Arc::new(HashingEmbedder::new(256).unwrap());
    let vector = db.vector_store(&format!("vectors_{}", tier), embedder).unwrap();
    TierStorage::new(
        tier,
        Arc::new(db.structured_store(&format!("memories_{}", tier)).unwrap()),
        Arc::new(FlakyVectorStore {
            inner: Arc::new(vector),
            fail_save_on,
            fail_search_on,
            saves: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
        }),
    )
}

/// Storage whose backends reject every call.
pub fn failing_tier(tier: MemoryTier) -> TierStorage {
    TierStorage::new(
        tier,
        Arc::new(FailingStructuredStore),
        Arc::new(FailingVectorStore),
    )
}

pub struct FailingVectorStore;

#[async_trait]
impl VectorStore for FailingVectorStore {
    async fn save(&self, _record: &MemoryRecord) -> Result<()> {
        Err(Error::vector("connection refused"))
    }

    async fn search(
        &self,
        _query: &str,
        _filter: &RecordFilter,
        _limit: usize,
        _score_threshold: f64,
        _session_id: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        Err(Error::vector("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::vector("connection refused"))
    }

    async fn delete_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Err(Error::vector("connection refused"))
    }

    async fn count(&self) -> Result<usize> {
        Err(Error::vector("connection refused"))
    }

    fn name(&self) -> &str {
        "failing_vectors"
    }
}

pub struct FailingStructuredStore;

#[async_trait]
impl StructuredStore for FailingStructuredStore {
    async fn save(&self, _record: &MemoryRecord) -> Result<()> {
        Err(Error::structured("connection refused"))
    }

    async fn get(&self, _key: &str) -> Result<Option<MemoryRecord>> {
        Err(Error::structured("connection refused"))
    }

    async fn search(
        &self,
        _filter: &RecordFilter,
        _limit: usize,
        _session_id: Option<&str>,
    ) -> Result<Vec<MemoryRecord>> {
        Err(Error::structured("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::structured("connection refused"))
    }

    async fn list_before(
        &self,
        _cutoff: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        Err(Error::structured("connection refused"))
    }

    async fn delete_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Err(Error::structured("connection refused"))
    }

    async fn record_access(&self, _key: &str) -> Result<()> {
        Err(Error::structured("connection refused"))
    }

    async fn count(&self) -> Result<usize> {
        Err(Error::structured("connection refused"))
    }

    fn name(&self) -> &str {
        "failing_memories"
    }
}

pub struct FlakyVectorStore {
    inner: Arc<dyn VectorStore>,
    fail_save_on: Option<usize>,
    fail_search_on: Option<usize>,
    saves: AtomicUsize,
    searches: AtomicUsize,
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn save(&self, record: &MemoryRecord) -> Result<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_save_on == Some(n) {
            return Err(Error::vector("timeout"));
        }
        self.inner.save(record).await
    }

    async fn search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
        score_threshold: f64,
        session_id: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        let n = self.searches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_search_on == Some(n) {
            return Err(Error::vector("timeout"));
        }
        self.inner
            .search(query, filter, limit, score_threshold, session_id)
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.delete_before(cutoff).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
