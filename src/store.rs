//! Layered memory facade.
//!
//! [`LayeredMemory`] is the API the orchestration and ingestion layers use:
//! sessions, writes routed to a tier, reads across tiers, and retention
//! maintenance. Writes and maintenance return the first hard error; reads
//! degrade and report failed tiers in [`Retrieved::failures`].
//!
//! # Example
//!
//! ```rust,ignore
//! use lms_core::{LayeredMemory, Role, StoreConfig, RetrieveQuery};
//!
//! let memory = LayeredMemory::open(StoreConfig::from_env())?;
//! let session = memory.create_session("user-1", "bi", Default::default(), Default::default()).await?;
//! memory.store_message(&session, Role::User, "How did rice yield change?", Default::default(), None).await?;
//! let context = memory.retrieve(&RetrieveQuery::new(&session, "rice yield")).await;
//! ```

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::knowledge::{
    build_chunk_records, collection_record, IngestOptions, KnowledgeCollection, KnowledgeSource,
};
use crate::memory::keys::parse_key;
use crate::memory::registry::LayerRegistry;
use crate::memory::retention::{self, CleanupReport, MigrationCriteria, MigrationReport};
use crate::memory::retrieval::{Paginated, RetrievalEngine, RetrievalRequest, RetrievalStrategy, Retrieved};
use crate::memory::router::select_tier;
use crate::memory::search::{search_all_tiers, CrossLayerQuery};
use crate::memory::types::{
    validate_importance, ContextType, MemoryRecord, MemoryTier, Metadata, RecordFilter, TierConfig,
};
use crate::session::SessionManager;

/// Importance of chat messages.
const MESSAGE_IMPORTANCE: f64 = 0.5;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A multi-tier read for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveQuery {
    pub session_id: String,
    pub query: String,
    /// Restrict to these context types (empty = any)
    pub context_types: Vec<ContextType>,
    pub limit: usize,
    /// Tiers to read (None = all)
    pub tiers: Option<Vec<MemoryTier>>,
    pub cross_session: bool,
    pub strategy: RetrievalStrategy,
    pub boost_recent: bool,
}

impl RetrieveQuery {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            context_types: Vec::new(),
            limit: 10,
            tiers: None,
            cross_session: true,
            strategy: RetrievalStrategy::Semantic,
            boost_recent: false,
        }
    }

    pub fn with_context_types(mut self, context_types: Vec<ContextType>) -> Self {
        self.context_types = context_types;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<MemoryTier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn with_cross_session(mut self, cross_session: bool) -> Self {
        self.cross_session = cross_session;
        self
    }

    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_boost_recent(mut self, boost: bool) -> Self {
        self.boost_recent = boost;
        self
    }

    fn request(&self) -> RetrievalRequest {
        RetrievalRequest::new(self.query.clone())
            .with_session(self.session_id.clone())
            .with_strategy(self.strategy)
            .with_limit(self.limit)
            .with_filter(RecordFilter::new().context_types(self.context_types.clone()))
            .with_cross_session(self.cross_session)
            .with_boost_recent(self.boost_recent)
    }
}

/// Configuration and contents of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStatistics {
    pub tier: MemoryTier,
    pub config: TierConfig,
    pub key_prefix: String,
    pub table_name: String,
    pub collection_name: String,
    pub record_count: usize,
    pub vector_count: usize,
}

/// Statistics of every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStatistics {
    pub tiers: Vec<TierStatistics>,
}

impl LayerStatistics {
    pub fn tier(&self, tier: MemoryTier) -> Option<&TierStatistics> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    pub fn total_records(&self) -> usize {
        self.tiers.iter().map(|t| t.record_count).sum()
    }
}

/// Three-tier memory store.
#[derive(Debug, Clone)]
pub struct LayeredMemory {
    config: StoreConfig,
    registry: LayerRegistry,
    engine: RetrievalEngine,
    sessions: SessionManager,
}

impl LayeredMemory {
    /// Open SQLite-backed storage described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let registry = LayerRegistry::from_config(&config)?;
        Self::with_registry(config, registry)
    }

    /// In-memory store with default settings.
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    /// Store over caller-supplied tier storage.
    pub fn with_registry(config: StoreConfig, registry: LayerRegistry) -> Result<Self> {
        config.validate()?;
        let engine = RetrievalEngine::new(config.score_threshold, config.cross_session_fallback);
        let sessions = SessionManager::new(registry.storage(MemoryTier::ShortTerm).clone())?;
        Ok(Self {
            config,
            registry,
            engine,
            sessions,
        })
    }

    /// Replace the retrieval engine, e.g. to register custom strategies.
    pub fn with_engine(mut self, engine: RetrievalEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    /// Session lifecycle operations.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Create an active session and return its id.
    pub async fn create_session(
        &self,
        user_id: &str,
        session_type: &str,
        preferences: Metadata,
        metadata: Metadata,
    ) -> Result<String> {
        self.sessions
            .create_session(user_id, session_type, preferences, metadata)
            .await
    }

    /// Store a chat message and return its key. Messages stay in-session
    /// unless `tier` says otherwise.
    pub async fn store_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Metadata,
        tier: Option<MemoryTier>,
    ) -> Result<String> {
        let tier = select_tier(&ContextType::Message, MESSAGE_IMPORTANCE, tier);
        let record = MemoryRecord::new(
            tier,
            session_id,
            ContextType::Message,
            serde_json::json!({ "role": role.as_str(), "content": content }),
        )
        .with_importance(MESSAGE_IMPORTANCE)
        .with_metadata_map(metadata)
        .with_metadata("role", role.as_str());

        self.registry.storage(tier).save(&record).await?;
        self.sessions.record_message(session_id).await?;
        Ok(record.key)
    }

    /// Store a context item in the tier the router picks and return its key.
    pub async fn store_context(
        &self,
        session_id: &str,
        context_type: ContextType,
        data: Value,
        importance: f64,
        metadata: Metadata,
        tier: Option<MemoryTier>,
    ) -> Result<String> {
        validate_importance(importance)?;
        let tier = select_tier(&context_type, importance, tier);
        let record = MemoryRecord::new(tier, session_id, context_type, data)
            .with_importance(importance)
            .with_metadata_map(metadata);

        self.registry.storage(tier).save(&record).await?;
        Ok(record.key)
    }

    /// Load, chunk and store a knowledge source, then rewrite the
    /// collection's summary record. Returns the stored chunks.
    pub async fn store_knowledge_chunks(
        &self,
        session_id: &str,
        source: &mut KnowledgeSource,
        options: &IngestOptions,
    ) -> Result<Vec<MemoryRecord>> {
        options.validate()?;
        let content = source.load()?.to_string();
        let records = build_chunk_records(session_id, source, &content, options)?;
        if records.is_empty() {
            return Ok(records);
        }

        let storage = self.registry.storage(options.tier);
        for record in &records {
            storage.save(record).await?;
        }
        let summary = collection_record(session_id, source, options, records.len())?;
        storage.replace(&summary).await?;

        info!(
            collection = %options.collection_name,
            source = %source.identifier(),
            chunks = records.len(),
            tier = %options.tier,
            version = source.version(),
            "Stored knowledge chunks"
        );
        Ok(records)
    }

    /// Summary of a knowledge collection visible to `session_id`.
    pub async fn get_collection(
        &self,
        session_id: &str,
        collection_name: &str,
    ) -> Result<Option<KnowledgeCollection>> {
        let filter = RecordFilter::new()
            .context_type(ContextType::KnowledgeCollection)
            .collection(collection_name);
        for storage in self.registry.iter() {
            let session = if storage.tier().config().cross_session {
                None
            } else {
                Some(session_id)
            };
            if let Some(record) = storage
                .search_structured(&filter, 1, session)
                .await?
                .into_iter()
                .next()
            {
                return Ok(Some(serde_json::from_value(record.payload)?));
            }
        }
        Ok(None)
    }

    /// Read the requested tiers concurrently and merge by score.
    pub async fn retrieve(&self, query: &RetrieveQuery) -> Retrieved {
        let request = query.request();
        let tiers = query.tiers.clone().unwrap_or_else(|| MemoryTier::ALL.to_vec());

        let reads = tiers
            .iter()
            .map(|tier| self.engine.retrieve(self.registry.storage(*tier), &request));

        let mut merged = Retrieved::default();
        for part in join_all(reads).await {
            merged.extend(part);
        }
        merged
            .records
            .sort_by(|a, b| b.ranking_score().total_cmp(&a.ranking_score()));
        merged.records.truncate(query.limit);

        debug!(
            session_id = %query.session_id,
            hits = merged.records.len(),
            degraded = merged.is_degraded(),
            "Retrieved context"
        );
        merged
    }

    /// One page of a single-tier retrieval.
    pub async fn paginate(
        &self,
        tier: MemoryTier,
        request: &RetrievalRequest,
        page: usize,
        page_size: usize,
    ) -> Result<Paginated> {
        self.engine
            .paginate(self.registry.storage(tier), request, page, page_size)
            .await
    }

    /// Ranked similarity search over every tier.
    pub async fn search_all_tiers(&self, query: &CrossLayerQuery) -> Retrieved {
        search_all_tiers(&self.registry, query, self.engine.score_threshold()).await
    }

    /// The most recent `limit` messages of a session, oldest first.
    pub async fn get_session_history(
        &self,
        session_id: &str,
        limit: usize,
        tiers: Option<&[MemoryTier]>,
    ) -> Result<Vec<MemoryRecord>> {
        let tiers = tiers.unwrap_or(&MemoryTier::ALL);
        let filter = RecordFilter::new()
            .context_type(ContextType::Message)
            .newest_first();

        // The newest `limit` of each tier covers the newest `limit` overall
        let mut messages = Vec::new();
        for tier in tiers {
            messages.extend(
                self.registry
                    .storage(*tier)
                    .search_structured(&filter, limit, Some(session_id))
                    .await?,
            );
        }

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    /// Delete records past retention (`tier == None` cleans every tier).
    pub async fn cleanup(&self, tier: Option<MemoryTier>, dry_run: bool) -> Result<CleanupReport> {
        retention::cleanup(&self.registry, tier, dry_run, Utc::now()).await
    }

    /// Move matching records between tiers.
    pub async fn migrate(
        &self,
        from: MemoryTier,
        to: MemoryTier,
        criteria: &MigrationCriteria,
        dry_run: bool,
    ) -> Result<MigrationReport> {
        retention::migrate(&self.registry, from, to, criteria, dry_run, Utc::now()).await
    }

    /// Per-tier configuration and record counts.
    pub async fn get_layer_statistics(&self) -> Result<LayerStatistics> {
        let mut tiers = Vec::new();
        for storage in self.registry.iter() {
            let (record_count, vector_count) = storage.counts().await?;
            let tier = storage.tier();
            tiers.push(TierStatistics {
                tier,
                config: tier.config(),
                key_prefix: tier.key_prefix().to_string(),
                table_name: storage.table_name().to_string(),
                collection_name: storage.collection_name().to_string(),
                record_count,
                vector_count,
            });
        }
        let stats = LayerStatistics { tiers };
        debug!(total_records = stats.total_records(), "Collected layer statistics");
        Ok(stats)
    }

    /// Look up a record by key and count the access.
    pub async fn get(&self, key: &str) -> Result<Option<MemoryRecord>> {
        let tier = tier_of(key)?;
        let storage = self.registry.storage(tier);
        let Some(mut record) = storage.get(key).await? else {
            return Ok(None);
        };
        storage.record_access(key).await?;
        record.access_count += 1;
        Ok(Some(record))
    }

    /// Delete a record from both backends of its tier.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let tier = tier_of(key)?;
        let removed = self.registry.storage(tier).delete(key).await?;
        if removed {
            debug!(key = %key, "Removed record");
        }
        Ok(removed)
    }
}

fn tier_of(key: &str) -> Result<MemoryTier> {
    parse_key(key)
        .map(|parsed| parsed.tier)
        .ok_or_else(|| Error::validation(format!("not a namespaced key: {}", key)))
}
