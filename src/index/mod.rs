//! Vector index: derived embedding records used only for ranking.
//!
//! The index never decides whether an agent exists. Records may be missing
//! or stale relative to the record store; search tolerates both.

mod memory;
mod qdrant;

pub use memory::MemoryVectorIndex;
pub use qdrant::QdrantVectorIndex;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::model::{VectorField, VectorRecord};

/// Read/write contract of the vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace any prior vectors for `record.address`. Idempotent by address.
    async fn upsert_agent_vectors(&self, record: VectorRecord) -> Result<()>;

    /// Nearest neighbours of `vector` on one field, most similar first,
    /// ties broken by address ascending.
    async fn query_similar(
        &self,
        vector: &[f32],
        field: VectorField,
        limit: usize,
    ) -> Result<Vec<(Address, f32)>>;

    /// Remove the vectors of `address`. No-op when absent.
    async fn delete_agent_vectors(&self, address: &Address) -> Result<()>;

    /// Number of indexed agents.
    async fn count(&self) -> Result<usize>;
}

/// Which vector index adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    #[default]
    Qdrant,
}

/// Vector index configuration. Dimensionality comes from the embedding
/// configuration so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Qdrant gRPC endpoint
    pub url: String,
    pub collection: String,
    /// Client-side request timeout
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            url: "http://localhost:6334".to_string(),
            collection: "agentdns_agents".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// Connect to the configured vector index.
pub async fn connect_index(config: &IndexConfig, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
    match config.backend {
        IndexBackend::Memory => Ok(Arc::new(MemoryVectorIndex::new(dimension))),
        IndexBackend::Qdrant => Ok(Arc::new(QdrantVectorIndex::connect(config, dimension).await?)),
    }
}

/// Cosine similarity; 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
