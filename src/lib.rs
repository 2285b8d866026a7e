//! # lms-core
//!
//! A layered memory store for conversational agents: three tiers of memory,
//! each backed by a structured store and a vector store, with routing,
//! retrieval and retention across them.
//!
//! ## Core Components
//!
//! - **Memory**: tiers, key namespacing, routing, storage adapters and retrieval
//! - **Knowledge**: chunking and versioning of ingested documents
//! - **Session**: session profiles, state and crew bookkeeping
//! - **Store**: the [`LayeredMemory`] facade tying the pieces together
//!
//! ## Example
//!
//! ```rust,ignore
//! use lms_core::{ContextType, LayeredMemory, RetrieveQuery, StoreConfig};
//!
//! let memory = LayeredMemory::open(StoreConfig::from_env())?;
//! let session = memory.create_session("analyst", "bi", Default::default(), Default::default()).await?;
//!
//! // Important BI data lands in long-term memory
//! let key = memory
//!     .store_context(&session, ContextType::BiData, json!({"yield": 4.2}), 0.8, Default::default(), None)
//!     .await?;
//! assert!(key.starts_with("lt:"));
//!
//! let context = memory.retrieve(&RetrieveQuery::new(&session, "rice yield")).await;
//! for hit in context.records {
//!     println!("{} ({:.2})", hit.key(), hit.score);
//! }
//! ```

pub mod config;
pub mod error;
pub mod knowledge;
pub mod memory;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use config::StoreConfig;
pub use error::{Backend, Error, Result};
pub use knowledge::{
    chunk_text, ChunkingConfig, IngestOptions, KnowledgeCollection, KnowledgeSource, SourceKind,
};
pub use memory::{
    CleanupReport, ContextType, CrossLayerQuery, LayerRegistry, MemoryRecord, MemoryTier,
    Metadata, MigrationCriteria, MigrationReport, Paginated, RecordFilter, RetrievalEngine,
    RetrievalRequest, RetrievalStrategy, Retrieved, ScoredRecord, TierConfig, TierStorage,
};
pub use session::{CrewEntry, Session, SessionManager, SessionProfile, SessionState, SessionStatus};
pub use store::{LayerStatistics, LayeredMemory, RetrieveQuery, Role, TierStatistics};
