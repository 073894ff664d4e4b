use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::DataEntryConfig;
use crate::error::Result;
use crate::sources::mbtiles::MbTilesSource;
use crate::sources::{TileMetadata, TileSource};

/// Holds every successfully loaded data entry, keyed by its configured id.
///
/// A data entry whose MBTiles file cannot be opened is dropped and logged,
/// per the non-fatal per-entry load policy.
pub struct SourceManager {
    sources: HashMap<String, Arc<MbTilesSource>>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Load every configured data entry against MBTiles files under `mbtiles_dir`.
    pub async fn from_configs(configs: &[DataEntryConfig], mbtiles_dir: &Path) -> Result<Self> {
        let mut manager = Self::new();

        for config in configs {
            match MbTilesSource::from_file(config, mbtiles_dir).await {
                Ok(source) => {
                    tracing::info!("Loaded data source: {} ({})", config.id, config.mbtiles);
                    manager.sources.insert(config.id.clone(), Arc::new(source));
                }
                Err(e) => {
                    tracing::warn!("Failed to load data source {}: {}", config.id, e);
                }
            }
        }

        Ok(manager)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<MbTilesSource>> {
        self.sources.get(id)
    }

    pub fn ids(&self) -> Vec<&String> {
        self.sources.keys().collect()
    }

    pub fn all_metadata(&self) -> Vec<&TileMetadata> {
        self.sources
            .values()
            .map(|s| s.metadata())
            .collect()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}
