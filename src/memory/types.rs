//! Core memory types: tiers, records, filters and scored results.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::memory::keys::build_key;

/// Metadata map attached to records.
pub type Metadata = Map<String, Value>;

/// Retention tier of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Global, cross-session knowledge kept for a year
    LongTerm,
    /// Session-scoped context kept for a month
    ShortTerm,
    /// Session- and hour-scoped scratch space kept for a day
    InSession,
}

impl MemoryTier {
    /// All tiers, from most to least durable.
    pub const ALL: [MemoryTier; 3] = [
        MemoryTier::LongTerm,
        MemoryTier::ShortTerm,
        MemoryTier::InSession,
    ];

    /// Storage name of the tier, used for table suffixes and tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::LongTerm => "long_term",
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::InSession => "in_session",
        }
    }

    /// Namespace prefix used in storage keys.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            MemoryTier::LongTerm => "lt",
            MemoryTier::ShortTerm => "st",
            MemoryTier::InSession => "is",
        }
    }

    /// Static configuration of the tier.
    pub fn config(&self) -> TierConfig {
        match self {
            MemoryTier::LongTerm => TierConfig {
                retention_days: 365,
                importance_threshold: 0.7,
                cross_session: true,
                importance_multiplier: 1.0,
            },
            MemoryTier::ShortTerm => TierConfig {
                retention_days: 30,
                importance_threshold: 0.5,
                cross_session: false,
                importance_multiplier: 0.8,
            },
            MemoryTier::InSession => TierConfig {
                retention_days: 1,
                importance_threshold: 0.3,
                cross_session: false,
                importance_multiplier: 0.6,
            },
        }
    }

    /// Resolve a tier from a key's namespace prefix.
    pub fn from_key_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "lt" => Some(MemoryTier::LongTerm),
            "st" => Some(MemoryTier::ShortTerm),
            "is" => Some(MemoryTier::InSession),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "long_term" => Ok(MemoryTier::LongTerm),
            "short_term" => Ok(MemoryTier::ShortTerm),
            "in_session" => Ok(MemoryTier::InSession),
            other => Err(Error::validation(format!("unknown memory tier: {}", other))),
        }
    }
}

/// Immutable per-tier policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Days a record survives before cleanup selects it
    pub retention_days: i64,
    /// Importance bar for automatic admission into the tier
    pub importance_threshold: f64,
    /// Whether reads may ignore the session that wrote the data
    pub cross_session: bool,
    /// Factor applied to base importance when content is written here
    pub importance_multiplier: f64,
}

impl TierConfig {
    /// Ranking multiplier for cross-tier search.
    pub fn weight(&self) -> f64 {
        1.0 + self.importance_threshold
    }

    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days)
    }
}

/// Kind of content stored in a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContextType {
    Message,
    Knowledge,
    BiData,
    Decision,
    ConversationSummary,
    IntermediateResult,
    CrewContext,
    Session,
    SessionState,
    KnowledgeCollection,
    /// Any caller-defined type
    Custom(String),
}

impl ContextType {
    pub fn as_str(&self) -> &str {
        match self {
            ContextType::Message => "message",
            ContextType::Knowledge => "knowledge",
            ContextType::BiData => "bi_data",
            ContextType::Decision => "decision",
            ContextType::ConversationSummary => "conversation_summary",
            ContextType::IntermediateResult => "intermediate_result",
            ContextType::CrewContext => "crew_context",
            ContextType::Session => "session",
            ContextType::SessionState => "session_state",
            ContextType::KnowledgeCollection => "knowledge_collection",
            ContextType::Custom(s) => s,
        }
    }
}

impl From<&str> for ContextType {
    fn from(s: &str) -> Self {
        match s {
            "message" => ContextType::Message,
            "knowledge" => ContextType::Knowledge,
            "bi_data" => ContextType::BiData,
            "decision" => ContextType::Decision,
            "conversation_summary" => ContextType::ConversationSummary,
            "intermediate_result" => ContextType::IntermediateResult,
            "crew_context" => ContextType::CrewContext,
            "session" => ContextType::Session,
            "session_state" => ContextType::SessionState,
            "knowledge_collection" => ContextType::KnowledgeCollection,
            other => ContextType::Custom(other.to_string()),
        }
    }
}

impl From<String> for ContextType {
    fn from(s: String) -> Self {
        ContextType::from(s.as_str())
    }
}

impl From<ContextType> for String {
    fn from(ct: ContextType) -> Self {
        ct.as_str().to_string()
    }
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Atomic unit of storage.
///
/// A record belongs to exactly one tier; `key` encodes that tier and,
/// below long-term, the owning session. `expires_at` is always
/// `created_at` plus the tier's retention window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Base identifier the key was built from
    pub id: String,
    /// Namespaced storage key
    pub key: String,
    /// Opaque content: text, structured map or chunk text
    pub payload: Value,
    pub session_id: String,
    pub context_type: ContextType,
    /// Importance in [0, 1]
    pub importance: f64,
    pub tier: MemoryTier,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    /// Caller-supplied metadata
    pub metadata: Metadata,
}

impl MemoryRecord {
    /// Create a record with a fresh UUID base identifier.
    pub fn new(
        tier: MemoryTier,
        session_id: impl Into<String>,
        context_type: ContextType,
        payload: impl Into<Value>,
    ) -> Self {
        Self::with_base(
            uuid::Uuid::new_v4().to_string(),
            tier,
            session_id,
            context_type,
            payload,
        )
    }

    /// Create a record under a caller-chosen base identifier.
    pub fn with_base(
        base: impl Into<String>,
        tier: MemoryTier,
        session_id: impl Into<String>,
        context_type: ContextType,
        payload: impl Into<Value>,
    ) -> Self {
        let id = base.into();
        let session_id = session_id.into();
        let created_at = Utc::now();
        Self {
            key: build_key(&id, tier, &session_id),
            id,
            payload: payload.into(),
            session_id,
            context_type,
            importance: 0.5,
            tier,
            tags: BTreeSet::new(),
            created_at,
            expires_at: created_at + tier.config().retention(),
            access_count: 0,
            metadata: Metadata::new(),
        }
    }

    /// Set importance.
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata map over the existing entries.
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Override the creation time; expiry follows.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.expires_at = created_at + self.tier.config().retention();
        self
    }

    /// Check importance bounds.
    pub fn validate(&self) -> Result<()> {
        validate_importance(self.importance)
    }

    /// Text handed to the embedder.
    pub fn embedding_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("content") {
                Some(Value::String(s)) => s.clone(),
                _ => self.payload.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Collection this record belongs to, if any.
    pub fn collection_name(&self) -> Option<&str> {
        self.metadata.get("collection_name").and_then(Value::as_str)
    }

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Reject importance values outside [0, 1].
pub fn validate_importance(importance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&importance) || importance.is_nan() {
        return Err(Error::validation(format!(
            "importance must be within [0, 1], got {}",
            importance
        )));
    }
    Ok(())
}

/// Which backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Semantic,
    Structured,
}

/// A record with its retrieval score and ranking annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    /// Raw similarity score (0 for structured hits)
    pub score: f64,
    pub source: RetrievalSource,
    /// Tier the hit was read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieved_from_layer: Option<MemoryTier>,
    /// Score adjusted by the tier weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_score: Option<f64>,
    /// Importance after the recency boost; base importance is untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boosted_importance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency_boost: Option<f64>,
}

impl ScoredRecord {
    /// A similarity hit.
    pub fn semantic(record: MemoryRecord, score: f64) -> Self {
        Self {
            record,
            score,
            source: RetrievalSource::Semantic,
            retrieved_from_layer: None,
            weighted_score: None,
            boosted_importance: None,
            recency_boost: None,
        }
    }

    /// An attribute-match hit.
    pub fn structured(record: MemoryRecord) -> Self {
        Self {
            record,
            score: 0.0,
            source: RetrievalSource::Structured,
            retrieved_from_layer: None,
            weighted_score: None,
            boosted_importance: None,
            recency_boost: None,
        }
    }

    /// Score used for ranking: weighted when present, raw otherwise.
    pub fn ranking_score(&self) -> f64 {
        self.weighted_score.unwrap_or(self.score)
    }

    pub fn key(&self) -> &str {
        &self.record.key
    }
}

/// Attribute filter for structured and vector searches.
///
/// Empty fields do not constrain the search. `tags` matches records carrying
/// any of the listed tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub context_types: Vec<ContextType>,
    pub tags: Vec<String>,
    pub collection_name: Option<String>,
    /// Case-insensitive substring match on the payload
    pub text: Option<String>,
    pub min_importance: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Metadata equality constraints
    pub attributes: Metadata,
    /// Return the most recently written records first
    #[serde(default)]
    pub newest_first: bool,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context_type(mut self, context_type: ContextType) -> Self {
        self.context_types.push(context_type);
        self
    }

    pub fn context_types(mut self, context_types: Vec<ContextType>) -> Self {
        self.context_types = context_types;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection_name = Some(name.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn min_importance(mut self, importance: f64) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// In-process evaluation of the filter.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.context_types.is_empty() && !self.context_types.contains(&record.context_type) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| record.tags.contains(t)) {
            return false;
        }
        if let Some(ref name) = self.collection_name {
            if record.collection_name() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(ref text) = self.text {
            let haystack = record.payload.to_string().to_lowercase();
            if !haystack.contains(&text.to_lowercase()) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if record.importance < min {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if record.created_at >= before {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|(k, v)| record.metadata.get(k) == Some(v))
    }
}
