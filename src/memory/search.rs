//! Cross-layer search: one query fanned out over every tier.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::registry::LayerRegistry;
use super::retrieval::{RetrievalFailure, RetrievalStrategy, Retrieved};
use super::types::{MemoryTier, RecordFilter};

/// Parameters of a search over all tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossLayerQuery {
    pub query: String,
    /// Session scoping short-term and in-session reads
    pub session_id: Option<String>,
    pub limit: usize,
    /// Rank by tier-weighted score instead of raw similarity
    pub weighted: bool,
    /// Read long-term memory across sessions
    pub cross_session: bool,
    pub filter: RecordFilter,
}

impl CrossLayerQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            limit: 10,
            weighted: true,
            cross_session: true,
            filter: RecordFilter::default(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn with_cross_session(mut self, cross_session: bool) -> Self {
        self.cross_session = cross_session;
        self
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Session filter for `tier`, or `None` when the tier is skipped.
    ///
    /// Session-scoped tiers are never read without a session.
    fn scope(&self, tier: MemoryTier) -> Option<Option<&str>> {
        let session = self.session_id.as_deref();
        if tier.config().cross_session {
            match (self.cross_session, session) {
                (true, _) => Some(None),
                (false, Some(s)) => Some(Some(s)),
                (false, None) => None,
            }
        } else {
            session.map(Some)
        }
    }
}

/// Query every eligible tier concurrently and merge the hits.
pub async fn search_all_tiers(
    registry: &LayerRegistry,
    query: &CrossLayerQuery,
    score_threshold: f64,
) -> Retrieved {
    let searches = registry.iter().filter_map(|storage| {
        let session = query.scope(storage.tier())?;
        Some(async move {
            let result = storage
                .search_vector(&query.query, &query.filter, query.limit, score_threshold, session)
                .await;
            (storage.tier(), result)
        })
    });

    let mut merged = Retrieved::default();
    for (tier, result) in join_all(searches).await {
        match result {
            Ok(mut hits) => {
                if query.weighted {
                    let weight = tier.config().weight();
                    for hit in &mut hits {
                        hit.weighted_score = Some(hit.score * weight);
                    }
                }
                merged.records.extend(hits);
            }
            Err(e) => {
                warn!(tier = %tier, error = %e, "Tier search failed, skipping tier");
                merged.failures.push(RetrievalFailure {
                    tier,
                    strategy: RetrievalStrategy::Semantic,
                    message: e.to_string(),
                });
            }
        }
    }

    merged
        .records
        .sort_by(|a, b| b.ranking_score().total_cmp(&a.ranking_score()));
    merged.records.truncate(query.limit);

    debug!(
        hits = merged.records.len(),
        failed_tiers = merged.failures.len(),
        "Cross-layer search complete"
    );
    merged
}
