//! Retrieval engine.
//!
//! Strategies are entries in a table keyed by [`RetrievalStrategy`]; each
//! entry is a [`StrategyHandler`] and composite strategies call back into
//! the engine for their building blocks. A strategy that fails does not fail
//! the read: the failure is logged and reported in [`Retrieved::failures`].
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = RetrievalEngine::new(0.3, true);
//! let request = RetrievalRequest::new("rice yield")
//!     .with_strategy(RetrievalStrategy::Hybrid)
//!     .with_session("session-1")
//!     .with_limit(5);
//! let retrieved = engine.retrieve(registry.storage(MemoryTier::ShortTerm), &request).await;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::adapter::TierStorage;
use super::backend::UNBOUNDED;
use super::types::{MemoryTier, RecordFilter, ScoredRecord};

/// How a tier is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Vector similarity with cross-session and structured fallbacks
    Semantic,
    /// Attribute filter in insertion order
    Structured,
    /// Semantic and structured merged, semantic first
    Hybrid,
    /// Semantic hits, newest first
    Temporal,
    /// Semantic hits, most important first
    Importance,
}

impl RetrievalStrategy {
    pub const ALL: [RetrievalStrategy; 5] = [
        RetrievalStrategy::Semantic,
        RetrievalStrategy::Structured,
        RetrievalStrategy::Hybrid,
        RetrievalStrategy::Temporal,
        RetrievalStrategy::Importance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Semantic => "semantic",
            RetrievalStrategy::Structured => "structured",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Temporal => "temporal",
            RetrievalStrategy::Importance => "importance",
        }
    }
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RetrievalStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown retrieval strategy: {}", s)))
    }
}

/// Parameters of one read against one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub strategy: RetrievalStrategy,
    pub limit: usize,
    /// Session the read is scoped to
    pub session_id: Option<String>,
    pub filter: RecordFilter,
    /// Attach recency-boosted importance to hits
    pub boost_recent: bool,
    /// Allow reading data written by other sessions
    pub cross_session: bool,
    /// Overrides the engine's similarity threshold
    pub score_threshold: Option<f64>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            strategy: RetrievalStrategy::Semantic,
            limit: 10,
            session_id: None,
            filter: RecordFilter::default(),
            boost_recent: false,
            cross_session: true,
            score_threshold: None,
        }
    }

    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_boost_recent(mut self, boost: bool) -> Self {
        self.boost_recent = boost;
        self
    }

    pub fn with_cross_session(mut self, cross_session: bool) -> Self {
        self.cross_session = cross_session;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Session filter applied to `tier`: cross-session tiers read globally
    /// when the request allows it.
    pub fn session_for(&self, tier: MemoryTier) -> Option<&str> {
        if tier.config().cross_session && self.cross_session {
            None
        } else {
            self.session_id.as_deref()
        }
    }
}

/// A sub-query that failed and was treated as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalFailure {
    pub tier: MemoryTier,
    pub strategy: RetrievalStrategy,
    pub message: String,
}

/// Hits plus the failures that were degraded away.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Retrieved {
    pub records: Vec<ScoredRecord>,
    pub failures: Vec<RetrievalFailure>,
}

impl Retrieved {
    pub fn new(records: Vec<ScoredRecord>) -> Self {
        Self {
            records,
            failures: Vec::new(),
        }
    }

    /// Whether any sub-query failed.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Merge another result's hits and failures into this one.
    pub fn extend(&mut self, other: Retrieved) {
        self.records.extend(other.records);
        self.failures.extend(other.failures);
    }

    fn degraded(failure: RetrievalFailure) -> Self {
        Self {
            records: Vec::new(),
            failures: vec![failure],
        }
    }
}

/// One page of a retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated {
    pub records: Vec<ScoredRecord>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<usize>,
    pub prev_page: Option<usize>,
    pub failures: Vec<RetrievalFailure>,
}

/// Entry of the strategy table.
#[async_trait]
pub trait StrategyHandler: Send + Sync {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        storage: &TierStorage,
        request: &RetrievalRequest,
        limit: usize,
    ) -> Result<Retrieved>;
}

/// Strategy table plus the similarity settings shared by all strategies.
#[derive(Clone)]
pub struct RetrievalEngine {
    strategies: HashMap<RetrievalStrategy, Arc<dyn StrategyHandler>>,
    score_threshold: f64,
    cross_session_fallback: bool,
}

impl RetrievalEngine {
    /// Engine with the built-in strategies registered.
    pub fn new(score_threshold: f64, cross_session_fallback: bool) -> Self {
        let mut strategies: HashMap<RetrievalStrategy, Arc<dyn StrategyHandler>> = HashMap::new();
        strategies.insert(RetrievalStrategy::Semantic, Arc::new(SemanticStrategy));
        strategies.insert(RetrievalStrategy::Structured, Arc::new(StructuredStrategy));
        strategies.insert(RetrievalStrategy::Hybrid, Arc::new(HybridStrategy));
        strategies.insert(
            RetrievalStrategy::Temporal,
            Arc::new(ReorderedSemantic::new(|a: &ScoredRecord, b: &ScoredRecord| {
                b.record.created_at.cmp(&a.record.created_at)
            })),
        );
        strategies.insert(
            RetrievalStrategy::Importance,
            Arc::new(ReorderedSemantic::new(|a: &ScoredRecord, b: &ScoredRecord| {
                b.record.importance.total_cmp(&a.record.importance)
            })),
        );
        Self {
            strategies,
            score_threshold,
            cross_session_fallback,
        }
    }

    /// Replace the handler of a strategy.
    pub fn with_strategy(
        mut self,
        strategy: RetrievalStrategy,
        handler: Arc<dyn StrategyHandler>,
    ) -> Self {
        self.strategies.insert(strategy, handler);
        self
    }

    pub fn score_threshold(&self) -> f64 {
        self.score_threshold
    }

    /// Run one strategy from the table.
    pub fn run<'a>(
        &'a self,
        strategy: RetrievalStrategy,
        storage: &'a TierStorage,
        request: &'a RetrievalRequest,
        limit: usize,
    ) -> BoxFuture<'a, Result<Retrieved>> {
        match self.strategies.get(&strategy) {
            Some(handler) => handler.retrieve(self, storage, request, limit),
            None => futures::future::ready(Err(Error::Internal(format!(
                "no handler registered for strategy {}",
                strategy
            ))))
            .boxed(),
        }
    }

    /// Read one tier. Never fails; failures are reported in the result.
    pub async fn retrieve(&self, storage: &TierStorage, request: &RetrievalRequest) -> Retrieved {
        if request.limit == 0 {
            return Retrieved::default();
        }

        let mut retrieved = match self
            .run(request.strategy, storage, request, request.limit)
            .await
        {
            Ok(retrieved) => retrieved,
            Err(e) => {
                warn!(tier = %storage.tier(), strategy = %request.strategy, error = %e, "Retrieval failed");
                Retrieved::degraded(RetrievalFailure {
                    tier: storage.tier(),
                    strategy: request.strategy,
                    message: e.to_string(),
                })
            }
        };

        for hit in &mut retrieved.records {
            hit.retrieved_from_layer = Some(storage.tier());
        }
        if request.boost_recent {
            apply_recency_boost(&mut retrieved.records, Utc::now());
        }
        retrieved.records.truncate(request.limit);

        debug!(
            tier = %storage.tier(),
            strategy = %request.strategy,
            hits = retrieved.records.len(),
            "Retrieved records"
        );
        retrieved
    }

    /// Retrieve one page. Totals come from an unbounded scan.
    pub async fn paginate(
        &self,
        storage: &TierStorage,
        request: &RetrievalRequest,
        page: usize,
        page_size: usize,
    ) -> Result<Paginated> {
        if page == 0 {
            return Err(Error::validation("page numbers start at 1"));
        }
        if page_size == 0 {
            return Err(Error::validation("page_size must be > 0"));
        }

        let scan = request.clone().with_limit(UNBOUNDED);
        let Retrieved { records, failures } = self.retrieve(storage, &scan).await;

        let total_count = records.len();
        let total_pages = total_count.div_ceil(page_size);
        let has_next = page < total_pages;
        let has_prev = page > 1;
        let records = records
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(Paginated {
            records,
            page,
            page_size,
            total_count,
            total_pages,
            has_next,
            has_prev,
            next_page: has_next.then_some(page + 1),
            prev_page: has_prev.then_some(page - 1),
            failures,
        })
    }

    fn threshold_for(&self, request: &RetrievalRequest) -> f64 {
        request.score_threshold.unwrap_or(self.score_threshold)
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("score_threshold", &self.score_threshold)
            .field("cross_session_fallback", &self.cross_session_fallback)
            .finish()
    }
}

/// Attach `boosted_importance = min(1, importance * (1 + boost * 0.2))`
/// where `boost = max(0.1, 1 - age_days / 365)`.
pub fn apply_recency_boost(hits: &mut [ScoredRecord], now: DateTime<Utc>) {
    for hit in hits {
        let boost = recency_boost(hit.record.created_at, now);
        hit.recency_boost = Some(boost);
        hit.boosted_importance = Some((hit.record.importance * (1.0 + boost * 0.2)).min(1.0));
    }
}

/// Recency factor in [0.1, 1].
pub fn recency_boost(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now - created_at).num_seconds() as f64 / 86_400.0;
    (1.0 - age_days / 365.0).clamp(0.1, 1.0)
}

struct SemanticStrategy;

#[async_trait]
impl StrategyHandler for SemanticStrategy {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        storage: &TierStorage,
        request: &RetrievalRequest,
        limit: usize,
    ) -> Result<Retrieved> {
        let threshold = engine.threshold_for(request);

        // Only cross-session tiers may widen to other sessions. With the
        // fallback on they try the caller's session first.
        let widen = storage.tier().config().cross_session
            && request.cross_session
            && engine.cross_session_fallback
            && request.session_id.is_some();
        let session = if widen {
            request.session_id.as_deref()
        } else {
            request.session_for(storage.tier())
        };

        let mut failures = Vec::new();
        let mut hits =
            search_or_record(storage, request, limit, threshold, session, &mut failures).await;

        if hits.is_empty() && failures.is_empty() && widen {
            debug!(tier = %storage.tier(), "No session hits, retrying across sessions");
            hits = search_or_record(storage, request, limit, threshold, None, &mut failures).await;
        }

        if hits.is_empty() {
            let mut fallback = engine
                .run(RetrievalStrategy::Structured, storage, request, limit)
                .await?;
            fallback.failures.extend(failures);
            return Ok(fallback);
        }

        Ok(Retrieved {
            records: hits,
            failures,
        })
    }
}

/// Vector search whose failure is recorded and treated as no hits.
async fn search_or_record(
    storage: &TierStorage,
    request: &RetrievalRequest,
    limit: usize,
    threshold: f64,
    session: Option<&str>,
    failures: &mut Vec<RetrievalFailure>,
) -> Vec<ScoredRecord> {
    match storage
        .search_vector(&request.query, &request.filter, limit, threshold, session)
        .await
    {
        Ok(hits) => hits,
        Err(e) => {
            warn!(tier = %storage.tier(), error = %e, "Semantic search failed, using structured search");
            failures.push(RetrievalFailure {
                tier: storage.tier(),
                strategy: RetrievalStrategy::Semantic,
                message: e.to_string(),
            });
            Vec::new()
        }
    }
}

struct StructuredStrategy;

#[async_trait]
impl StrategyHandler for StructuredStrategy {
    async fn retrieve(
        &self,
        _engine: &RetrievalEngine,
        storage: &TierStorage,
        request: &RetrievalRequest,
        limit: usize,
    ) -> Result<Retrieved> {
        let records = storage
            .search_structured(&request.filter, limit, request.session_for(storage.tier()))
            .await?;
        Ok(Retrieved::new(
            records.into_iter().map(ScoredRecord::structured).collect(),
        ))
    }
}

struct HybridStrategy;

#[async_trait]
impl StrategyHandler for HybridStrategy {
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        storage: &TierStorage,
        request: &RetrievalRequest,
        limit: usize,
    ) -> Result<Retrieved> {
        let half = limit / 2 + 1;
        let (semantic, structured) = futures::join!(
            engine.run(RetrievalStrategy::Semantic, storage, request, half),
            engine.run(RetrievalStrategy::Structured, storage, request, half),
        );

        let mut merged = Retrieved::default();
        let mut seen = HashSet::new();
        for (strategy, result) in [
            (RetrievalStrategy::Semantic, semantic),
            (RetrievalStrategy::Structured, structured),
        ] {
            match result {
                Ok(part) => {
                    for hit in part.records {
                        if seen.insert(hit.record.key.clone()) {
                            merged.records.push(hit);
                        }
                    }
                    merged.failures.extend(part.failures);
                }
                Err(e) => {
                    warn!(tier = %storage.tier(), strategy = %strategy, error = %e, "Hybrid sub-query failed");
                    merged.failures.push(RetrievalFailure {
                        tier: storage.tier(),
                        strategy,
                        message: e.to_string(),
                    });
                }
            }
        }

        merged.records.truncate(limit);
        Ok(merged)
    }
}

/// Semantic hits over-fetched twofold, then reordered.
struct ReorderedSemantic<F> {
    order: F,
}

impl<F> ReorderedSemantic<F> {
    fn new(order: F) -> Self {
        Self { order }
    }
}

#[async_trait]
impl<F> StrategyHandler for ReorderedSemantic<F>
where
    F: Fn(&ScoredRecord, &ScoredRecord) -> std::cmp::Ordering + Send + Sync,
{
    async fn retrieve(
        &self,
        engine: &RetrievalEngine,
        storage: &TierStorage,
        request: &RetrievalRequest,
        limit: usize,
    ) -> Result<Retrieved> {
        let mut retrieved = engine
            .run(RetrievalStrategy::Semantic, storage, request, limit.saturating_mul(2))
            .await?;
        retrieved.records.sort_by(|a, b| (self.order)(a, b));
        retrieved.records.truncate(limit);
        Ok(retrieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{failing_tier, flaky_tier, sqlite_tier};
    use crate::memory::types::{ContextType, MemoryRecord, RetrievalSource};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn engine() -> RetrievalEngine {
        RetrievalEngine::new(0.3, true)
    }

    async fn seed(storage: &TierStorage, session: &str, texts: &[&str]) -> Vec<MemoryRecord> {
        let mut records = Vec::new();
        for text in texts {
            let record = MemoryRecord::new(storage.tier(), session, ContextType::Decision, *text)
                .with_tag("farm");
            storage.save(&record).await.unwrap();
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_semantic_hits() {
        let storage = sqlite_tier(MemoryTier::ShortTerm);
        seed(&storage, "s1", &["irrigation plan for rice", "tax deadline"]).await;

        let request = RetrievalRequest::new("rice irrigation").with_session("s1");
        let retrieved = engine().retrieve(&storage, &request).await;
        assert!(!retrieved.is_degraded());
        assert_eq!(retrieved.records.len(), 1);
        assert_eq!(retrieved.records[0].source, RetrievalSource::Semantic);
        assert_eq!(
            retrieved.records[0].retrieved_from_layer,
            Some(MemoryTier::ShortTerm)
        );
    }

    #[tokio::test]
    async fn test_session_tiers_never_read_other_sessions() {
        let request = RetrievalRequest::new("rice irrigation").with_session("s1");
        for tier in [MemoryTier::ShortTerm, MemoryTier::InSession] {
            let storage = sqlite_tier(tier);
            seed(&storage, "other", &["irrigation plan for rice"]).await;

            for strategy in RetrievalStrategy::ALL {
                let request = request.clone().with_strategy(strategy);
                let retrieved = engine().retrieve(&storage, &request).await;
                assert!(retrieved.records.is_empty(), "{tier} {strategy} leaked");
            }
        }
    }

    #[tokio::test]
    async fn test_long_term_cross_session_fallback() {
        let storage = sqlite_tier(MemoryTier::LongTerm);
        seed(&storage, "other", &["irrigation plan for rice"]).await;

        let request = RetrievalRequest::new("rice irrigation").with_session("s1");
        let retrieved = engine().retrieve(&storage, &request).await;
        assert_eq!(retrieved.records.len(), 1);
        assert_eq!(retrieved.records[0].source, RetrievalSource::Semantic);
        assert_eq!(retrieved.records[0].record.session_id, "other");

        // Without the fallback long-term reads are global from the start
        let disabled = RetrievalEngine::new(0.3, false);
        assert_eq!(disabled.retrieve(&storage, &request).await.records.len(), 1);

        // Session hits win over other sessions when the fallback is on
        seed(&storage, "s1", &["rice irrigation schedule"]).await;
        let retrieved = engine().retrieve(&storage, &request).await;
        assert_eq!(retrieved.records.len(), 1);
        assert_eq!(retrieved.records[0].record.session_id, "s1");

        let scoped = request.with_cross_session(false);
        let retrieved = engine().retrieve(&storage, &scoped).await;
        assert!(retrieved.records.iter().all(|r| r.record.session_id == "s1"));
    }

    #[tokio::test]
    async fn test_failed_cross_session_retry_falls_back_to_structured() {
        let storage = flaky_tier(MemoryTier::LongTerm, None, Some(2));
        seed(&storage, "other", &["irrigation plan for rice"]).await;

        let request = RetrievalRequest::new("rice irrigation").with_session("s1");
        let retrieved = engine().retrieve(&storage, &request).await;
        assert!(retrieved.is_degraded());
        assert_eq!(retrieved.failures[0].strategy, RetrievalStrategy::Semantic);
        assert_eq!(retrieved.records.len(), 1);
        assert_eq!(retrieved.records[0].source, RetrievalSource::Structured);
    }

    #[tokio::test]
    async fn test_semantic_falls_back_to_structured() {
        let storage = sqlite_tier(MemoryTier::ShortTerm);
        seed(&storage, "s1", &["irrigation plan"]).await;

        let request = RetrievalRequest::new("quantum chromodynamics").with_session("s1");
        let retrieved = engine().retrieve(&storage, &request).await;
        assert_eq!(retrieved.records.len(), 1);
        assert_eq!(retrieved.records[0].source, RetrievalSource::Structured);
    }

    #[tokio::test]
    async fn test_hybrid_dedupes_semantic_first() {
        let storage = sqlite_tier(MemoryTier::ShortTerm);
        let records = seed(&storage, "s1", &["rice harvest", "wheat", "barley", "oats"]).await;

        let request = RetrievalRequest::new("rice harvest")
            .with_session("s1")
            .with_strategy(RetrievalStrategy::Hybrid)
            .with_limit(4);
        let retrieved = engine().retrieve(&storage, &request).await;

        assert_eq!(retrieved.records[0].record.key, records[0].key);
        assert_eq!(retrieved.records[0].source, RetrievalSource::Semantic);
        let keys: HashSet<&str> = retrieved.records.iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), retrieved.records.len());
        assert!(retrieved.records.len() <= 4);
        // limit/2 + 1 structured hits in insertion order cover the first three
        let expected: HashSet<&str> = records[..3].iter().map(|r| r.key.as_str()).collect();
        assert!(expected.is_subset(&keys));
    }

    #[tokio::test]
    async fn test_temporal_and_importance_ordering() {
        let storage = sqlite_tier(MemoryTier::ShortTerm);
        let now = Utc::now();
        let old = MemoryRecord::new(MemoryTier::ShortTerm, "s1", ContextType::Decision, "rice plan old")
            .with_importance(0.9)
            .with_created_at(now - Duration::days(5));
        let new = MemoryRecord::new(MemoryTier::ShortTerm, "s1", ContextType::Decision, "rice plan new")
            .with_importance(0.4);
        storage.save(&old).await.unwrap();
        storage.save(&new).await.unwrap();

        let temporal = RetrievalRequest::new("rice plan")
            .with_session("s1")
            .with_strategy(RetrievalStrategy::Temporal);
        let retrieved = engine().retrieve(&storage, &temporal).await;
        assert_eq!(retrieved.records[0].record.key, new.key);

        let importance = temporal.with_strategy(RetrievalStrategy::Importance);
        let retrieved = engine().retrieve(&storage, &importance).await;
        assert_eq!(retrieved.records[0].record.key, old.key);
    }

    #[tokio::test]
    async fn test_failures_degrade_to_empty() {
        let storage = failing_tier(MemoryTier::LongTerm);
        for strategy in RetrievalStrategy::ALL {
            let request = RetrievalRequest::new("anything").with_strategy(strategy);
            let retrieved = engine().retrieve(&storage, &request).await;
            assert!(retrieved.records.is_empty());
            assert!(retrieved.is_degraded(), "{strategy} should report failure");
        }
    }

    #[test]
    fn test_recency_boost() {
        let now = Utc::now();
        assert!((recency_boost(now, now) - 1.0).abs() < 1e-9);
        assert_eq!(recency_boost(now - Duration::days(730), now), 0.1);

        let record = MemoryRecord::new(MemoryTier::LongTerm, "s", ContextType::Knowledge, "x")
            .with_importance(0.5);
        let mut hits = vec![ScoredRecord::semantic(record, 0.8)];
        apply_recency_boost(&mut hits, now);
        let boosted = hits[0].boosted_importance.unwrap();
        assert!(boosted > 0.5 && boosted <= 0.6 + 1e-9);
        assert_eq!(hits[0].record.importance, 0.5);

        let full = MemoryRecord::new(MemoryTier::LongTerm, "s", ContextType::Knowledge, "x")
            .with_importance(1.0);
        let mut hits = vec![ScoredRecord::semantic(full, 0.8)];
        apply_recency_boost(&mut hits, now);
        assert_eq!(hits[0].boosted_importance, Some(1.0));
    }

    #[tokio::test]
    async fn test_pagination() {
        let storage = sqlite_tier(MemoryTier::ShortTerm);
        seed(&storage, "s1", &["a", "b", "c", "d", "e", "f", "g"]).await;

        let request = RetrievalRequest::new("")
            .with_session("s1")
            .with_strategy(RetrievalStrategy::Structured)
            .with_filter(RecordFilter::new().tag("farm"));

        let first = engine().paginate(&storage, &request, 1, 3).await.unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.total_count, 7);
        assert_eq!(first.total_pages, 3);
        assert!(first.has_next);
        assert!(!first.has_prev);
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.prev_page, None);

        let last = engine().paginate(&storage, &request, 3, 3).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(!last.has_next);
        assert!(last.has_prev);

        assert!(engine().paginate(&storage, &request, 0, 3).await.is_err());
        assert!(engine().paginate(&storage, &request, 1, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_pagination_counts_every_match() {
        let storage = sqlite_tier(MemoryTier::ShortTerm);
        let texts: Vec<String> = (0..1005).map(|i| format!("note {}", i)).collect();
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        seed(&storage, "s1", &texts).await;

        let request = RetrievalRequest::new("")
            .with_session("s1")
            .with_strategy(RetrievalStrategy::Structured);

        let first = engine().paginate(&storage, &request, 1, 10).await.unwrap();
        assert_eq!(first.total_count, 1005);
        assert_eq!(first.total_pages, 101);

        let last = engine().paginate(&storage, &request, 101, 10).await.unwrap();
        assert_eq!(last.records.len(), 5);
        assert!(!last.has_next);
    }

    #[test]
    fn test_strategy_parse() {
        for strategy in RetrievalStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<RetrievalStrategy>().unwrap(), strategy);
        }
        assert!("random".parse::<RetrievalStrategy>().is_err());
    }

    #[test]
    fn test_session_scope() {
        let request = RetrievalRequest::new("q").with_session("s1");
        assert_eq!(request.session_for(MemoryTier::LongTerm), None);
        assert_eq!(request.session_for(MemoryTier::ShortTerm), Some("s1"));
        let scoped = request.with_cross_session(false);
        assert_eq!(scoped.session_for(MemoryTier::LongTerm), Some("s1"));
    }
}
