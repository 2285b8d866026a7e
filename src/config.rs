//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::memory::embedding::HASHING_MODEL;
use crate::memory::schema::is_valid_identifier;
use crate::memory::types::MemoryTier;

/// Configuration for a [`crate::LayeredMemory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file (None = in-memory)
    pub database_path: Option<PathBuf>,
    /// Base name of the structured tables, suffixed per tier
    pub table_prefix: String,
    /// Base name of the vector collections, suffixed per tier
    pub collection_prefix: String,
    /// Embedding model identifier recorded with stored vectors
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    /// Minimum similarity for semantic hits
    pub score_threshold: f64,
    /// Retry session-scoped semantic misses across sessions
    pub cross_session_fallback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table_prefix: "memories".to_string(),
            collection_prefix: "vectors".to_string(),
            embedding_model: HASHING_MODEL.to_string(),
            embedding_dimensions: 256,
            score_threshold: 0.3,
            cross_session_fallback: true,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("LMS_DATABASE_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| PathBuf::from(shellexpand::tilde(&s).into_owned())),
            table_prefix: std::env::var("LMS_TABLE_PREFIX").unwrap_or(defaults.table_prefix),
            collection_prefix: std::env::var("LMS_COLLECTION_PREFIX")
                .unwrap_or(defaults.collection_prefix),
            embedding_model: std::env::var("LMS_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimensions: std::env::var("LMS_EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.embedding_dimensions),
            score_threshold: std::env::var("LMS_SCORE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.score_threshold),
            cross_session_fallback: defaults.cross_session_fallback,
        }
    }

    /// Persist to a database file. `~` is expanded.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        self.database_path = Some(match path.to_str() {
            Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
            None => path,
        });
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_collection_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.collection_prefix = prefix.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_dimensions = dimensions;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_cross_session_fallback(mut self, enabled: bool) -> Self {
        self.cross_session_fallback = enabled;
        self
    }

    /// Structured table name of a tier.
    pub fn table_name(&self, tier: MemoryTier) -> String {
        format!("{}_{}", self.table_prefix, tier)
    }

    /// Vector collection name of a tier.
    pub fn collection_name(&self, tier: MemoryTier) -> String {
        format!("{}_{}", self.collection_prefix, tier)
    }

    /// Check the configuration before opening any backend.
    pub fn validate(&self) -> Result<()> {
        for tier in MemoryTier::ALL {
            for name in [self.table_name(tier), self.collection_name(tier)] {
                if !is_valid_identifier(&name) {
                    return Err(Error::Config(format!("invalid table name: {:?}", name)));
                }
            }
        }
        if self.table_prefix == self.collection_prefix {
            return Err(Error::Config(
                "table_prefix and collection_prefix must differ".to_string(),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(Error::Config("embedding_dimensions must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(Error::Config(format!(
                "score_threshold must be within [0, 1], got {}",
                self.score_threshold
            )));
        }
        Ok(())
    }
}
