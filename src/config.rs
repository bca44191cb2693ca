//! Resolver configuration, stored as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::{AddressParser, DEFAULT_SCHEME};
use crate::error::{Error, Result};
use crate::index::{IndexBackend, IndexConfig};
use crate::retry::RetryConfig;
use crate::search::{EmbeddingServiceConfig, HybridSearchConfig};
use crate::store::{StoreBackend, StoreConfig};

/// Complete resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Address scheme accepted by this resolver
    pub scheme: String,
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingServiceConfig,
    pub search: HybridSearchConfig,
    /// Retry policy for store, index and provider calls
    pub retry: RetryConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            store: StoreConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingServiceConfig::default(),
            search: HybridSearchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Everything in process memory with hash embeddings. Nothing persists.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Memory,
                ..Default::default()
            },
            index: IndexConfig {
                backend: IndexBackend::Memory,
                ..Default::default()
            },
            embedding: EmbeddingServiceConfig::hash(dimension),
            ..Default::default()
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        AddressParser::new(&self.scheme)?;
        if self.store.backend == StoreBackend::RocksDb && self.store.path.as_os_str().is_empty() {
            return Err(Error::Config("store.path is required for rocksdb".into()));
        }
        if self.index.backend == IndexBackend::Qdrant {
            if self.index.url.trim().is_empty() {
                return Err(Error::Config("index.url is required for qdrant".into()));
            }
            if self.index.collection.trim().is_empty() {
                return Err(Error::Config("index.collection must not be empty".into()));
            }
        }
        self.embedding.validate()?;
        self.search.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}
