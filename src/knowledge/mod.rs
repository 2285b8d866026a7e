//! Knowledge ingestion: chunking documents into tier records.
//!
//! A source is chunked, each chunk becomes a `knowledge` record tagged with
//! its position and collection, and one `knowledge_collection` record under
//! the base key `collection:<name>` describes the collection as a whole.

pub mod chunker;
pub mod source;

pub use chunker::{chunk_text, ChunkingConfig};
pub use source::{KnowledgeSource, SourceKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::memory::router::adjust_importance_for_tier;
use crate::memory::types::{validate_importance, ContextType, MemoryRecord, MemoryTier};

/// Summary of the chunks derived from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeCollection {
    pub collection_name: String,
    pub source_identifier: String,
    pub tier: MemoryTier,
    pub version: u32,
    pub chunk_count: usize,
    pub tags: BTreeSet<String>,
    pub importance: f64,
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub created_at: DateTime<Utc>,
}

/// How a source is ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub collection_name: String,
    pub tier: MemoryTier,
    pub tags: Vec<String>,
    /// Base importance before the tier multiplier
    pub importance: f64,
    pub chunking: ChunkingConfig,
}

impl IngestOptions {
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            tier: MemoryTier::LongTerm,
            tags: Vec::new(),
            importance: 0.7,
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn with_tier(mut self, tier: MemoryTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_chunking(mut self, chunk_size: usize, overlap_size: usize) -> Self {
        self.chunking = ChunkingConfig::new(chunk_size, overlap_size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_importance(self.importance)?;
        self.chunking.validate()
    }
}

/// Base key of a collection's summary record.
pub fn collection_base(collection_name: &str) -> String {
    format!("collection:{}", collection_name)
}

/// Chunk records for already-loaded `content`.
pub fn build_chunk_records(
    session_id: &str,
    source: &KnowledgeSource,
    content: &str,
    options: &IngestOptions,
) -> Result<Vec<MemoryRecord>> {
    options.validate()?;
    let chunks = chunk_text(
        content,
        options.chunking.chunk_size,
        options.chunking.overlap_size,
    )?;
    let total = chunks.len();
    let importance = adjust_importance_for_tier(options.importance, options.tier);
    let name = source.display_name();

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let chunk_size = chunk.chars().count();
            MemoryRecord::new(options.tier, session_id, ContextType::Knowledge, chunk)
                .with_importance(importance)
                .with_tags(options.tags.iter().cloned())
                .with_tags([
                    format!("chunk_{}", i),
                    source.kind_tag().to_string(),
                    options.collection_name.clone(),
                    options.tier.to_string(),
                ])
                .with_metadata("collection_name", options.collection_name.clone())
                .with_metadata("source", source.identifier())
                .with_metadata("chunk_index", i)
                .with_metadata("total_chunks", total)
                .with_metadata("chunk_size", chunk_size)
                .with_metadata("version", source.version())
                .with_metadata(
                    "description",
                    format!(
                        "Knowledge chunk {}/{} from {} (collection: {}, layer: {})",
                        i + 1,
                        total,
                        name,
                        options.collection_name,
                        options.tier
                    ),
                )
        })
        .collect())
}

/// Summary record describing a collection after ingestion.
pub fn collection_record(
    session_id: &str,
    source: &KnowledgeSource,
    options: &IngestOptions,
    chunk_count: usize,
) -> Result<MemoryRecord> {
    let collection = KnowledgeCollection {
        collection_name: options.collection_name.clone(),
        source_identifier: source.identifier().to_string(),
        tier: options.tier,
        version: source.version(),
        chunk_count,
        tags: options.tags.iter().cloned().collect(),
        importance: options.importance,
        chunk_size: options.chunking.chunk_size,
        overlap_size: options.chunking.overlap_size,
        created_at: Utc::now(),
    };

    Ok(MemoryRecord::with_base(
        collection_base(&options.collection_name),
        options.tier,
        session_id,
        ContextType::KnowledgeCollection,
        serde_json::to_value(&collection)?,
    )
    .with_importance(adjust_importance_for_tier(options.importance, options.tier))
    .with_tag(options.collection_name.clone())
    .with_metadata("collection_name", options.collection_name.clone())
    .with_metadata("version", source.version()))
}
