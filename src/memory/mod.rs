//! Tiered memory with structured and vector storage.
//!
//! Records live in one of three tiers:
//!
//! - **LongTerm**: persistent knowledge shared across sessions (365 days)
//! - **ShortTerm**: session-scoped decisions and state (30 days)
//! - **InSession**: the live conversation (1 day)
//!
//! Every tier has a structured store (exact filters, bookkeeping) and a
//! vector store (similarity search) behind the [`StructuredStore`] and
//! [`VectorStore`] traits. [`TierStorage`] writes to both and
//! [`LayerRegistry`] holds the storage of all three tiers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lms_core::memory::{LayerRegistry, RetrievalEngine, RetrievalRequest, MemoryTier};
//!
//! let registry = LayerRegistry::from_config(&StoreConfig::default())?;
//! let engine = RetrievalEngine::new(0.3, true);
//!
//! let request = RetrievalRequest::new("crop yield").with_session("s1");
//! let hits = engine.retrieve(registry.storage(MemoryTier::LongTerm), &request).await;
//! ```

pub mod adapter;
pub mod backend;
pub mod embedding;
pub mod keys;
pub mod registry;
pub mod retention;
pub mod retrieval;
pub mod router;
pub mod schema;
pub mod search;
pub mod sqlite;
pub mod types;

mod proptest;
#[cfg(test)]
pub(crate) mod testing;

pub use adapter::TierStorage;
pub use backend::{Embedder, StructuredStore, VectorStore};
pub use embedding::{cosine_similarity, HashingEmbedder, HASHING_MODEL};
pub use keys::{build_key, parse_key, ParsedKey};
pub use registry::LayerRegistry;
pub use retention::{
    cleanup, migrate, CleanupReport, MigratedRecord, MigrationCriteria, MigrationReport,
    TierCleanup,
};
pub use retrieval::{
    Paginated, RetrievalEngine, RetrievalFailure, RetrievalRequest, RetrievalStrategy, Retrieved,
    StrategyHandler,
};
pub use router::{adjust_importance_for_tier, select_tier};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use search::{search_all_tiers, CrossLayerQuery};
pub use sqlite::{SqliteDatabase, SqliteStructuredStore, SqliteVectorStore};
pub use types::{
    ContextType, MemoryRecord, MemoryTier, Metadata, RecordFilter, RetrievalSource, ScoredRecord,
    TierConfig,
};
