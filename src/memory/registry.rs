//! Tier registry: the storage handles of every tier.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::{Error, Result};

use super::adapter::TierStorage;
use super::backend::Embedder;
use super::embedding::HashingEmbedder;
use super::sqlite::SqliteDatabase;
use super::types::MemoryTier;

/// Storage of all three tiers.
#[derive(Debug, Clone)]
pub struct LayerRegistry {
    storages: HashMap<MemoryTier, TierStorage>,
}

impl LayerRegistry {
    /// Build from one storage per tier. Every tier must be present once.
    pub fn from_storages(storages: impl IntoIterator<Item = TierStorage>) -> Result<Self> {
        let mut map = HashMap::new();
        for storage in storages {
            let tier = storage.tier();
            if map.insert(tier, storage).is_some() {
                return Err(Error::Config(format!("duplicate storage for tier {}", tier)));
            }
        }
        for tier in MemoryTier::ALL {
            if !map.contains_key(&tier) {
                return Err(Error::Config(format!("missing storage for tier {}", tier)));
            }
        }
        Ok(Self { storages: map })
    }

    /// Open SQLite storage for every tier with the hashing embedder.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let embedder: Arc<dyn Embedder> = Arc::new(
            HashingEmbedder::new(config.embedding_dimensions)?
                .with_model(config.embedding_model.clone()),
        );
        Self::from_config_with_embedder(config, embedder)
    }

    /// Open SQLite storage for every tier with a caller-supplied embedder.
    pub fn from_config_with_embedder(
        config: &StoreConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        let db = match &config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                SqliteDatabase::open(path)?
            }
            None => SqliteDatabase::in_memory()?,
        };

        let mut storages = Vec::with_capacity(MemoryTier::ALL.len());
        for tier in MemoryTier::ALL {
            let structured = db.structured_store(&config.table_name(tier))?;
            let vector = db.vector_store(&config.collection_name(tier), Arc::clone(&embedder))?;
            storages.push(TierStorage::new(tier, Arc::new(structured), Arc::new(vector)));
        }

        info!(
            path = ?config.database_path,
            model = %embedder.model(),
            dimensions = embedder.dimensions(),
            "Opened layered memory storage"
        );
        Self::from_storages(storages)
    }

    /// Storage of one tier.
    pub fn storage(&self, tier: MemoryTier) -> &TierStorage {
        // Construction guarantees every tier is present
        &self.storages[&tier]
    }

    /// Storages in tier order.
    pub fn iter(&self) -> impl Iterator<Item = &TierStorage> {
        MemoryTier::ALL.iter().map(move |tier| &self.storages[tier])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::sqlite_tier;

    #[test]
    fn test_from_config_creates_every_tier() {
        let registry = LayerRegistry::from_config(&StoreConfig::default()).unwrap();
        let names: Vec<&str> = registry.iter().map(|s| s.table_name()).collect();
        assert_eq!(
            names,
            vec!["memories_long_term", "memories_short_term", "memories_in_session"]
        );
        assert_eq!(
            registry.storage(MemoryTier::ShortTerm).collection_name(),
            "vectors_short_term"
        );
    }

    #[test]
    fn test_from_storages_requires_all_tiers() {
        let err = LayerRegistry::from_storages(vec![sqlite_tier(MemoryTier::LongTerm)]);
        assert!(matches!(err, Err(Error::Config(_))));

        let dup = LayerRegistry::from_storages(vec![
            sqlite_tier(MemoryTier::LongTerm),
            sqlite_tier(MemoryTier::LongTerm),
        ]);
        assert!(matches!(dup, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoreConfig::default().with_embedding_dimensions(0);
        assert!(LayerRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_on_disk_database_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let config = StoreConfig::default().with_database_path(&path);
        LayerRegistry::from_config(&config).unwrap();
        assert!(path.exists());
    }
}
