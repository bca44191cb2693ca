//! Semantic search module for agent discovery.
//!
//! Provides hybrid search over registered agents using:
//! - FastEmbed (or deterministic feature hashing) for embedding generation
//! - Qdrant for vector storage and similarity search
//! - BM25 keyword matching from the record store's tantivy index
//! - Reciprocal Rank Fusion to merge the three candidate lists
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────┐
//!                        │  Query text  │
//!                        └──────┬───────┘
//!                               │
//!              ┌────────────────┴────────────────┐
//!              │                                 │
//!              ▼                                 ▼
//!      ┌───────────────┐                ┌─────────────────┐
//!      │  RecordStore  │                │ EmbeddingService│
//!      │     BM25      │                │  (cache, retry) │
//!      └───────┬───────┘                └───────┬─────────┘
//!              │                                │
//!              │                   ┌────────────┴────────────┐
//!              │                   ▼                         ▼
//!              │           ┌──────────────┐          ┌──────────────┐
//!              │           │ VectorIndex  │          │ VectorIndex  │
//!              │           │ description  │          │    tags      │
//!              │           └──────┬───────┘          └──────┬───────┘
//!              │                  │                         │
//!              └──────────────────┼─────────────────────────┘
//!                                 ▼
//!                         ┌──────────────┐
//!                         │  RRF fusion  │
//!                         └──────┬───────┘
//!                                ▼
//!                         ┌──────────────┐
//!                         │  Hydration   │
//!                         │ (RecordStore)│
//!                         └──────────────┘
//! ```

mod embedding;
mod fusion;
mod hybrid;
mod query;

pub use embedding::{
    Embedding, EmbeddingProvider, EmbeddingProviderKind, EmbeddingService,
    EmbeddingServiceConfig, FastEmbedProvider, HashEmbeddingProvider,
};
pub use fusion::{reciprocal_rank_fusion, FusedCandidate, DEFAULT_RRF_K};
pub use hybrid::{
    HybridSearch, HybridSearchConfig, SearchFilter, SearchResult, DEFAULT_OVERFETCH_FACTOR,
};
pub use query::{expand_synonyms, normalize_query, KeywordExtractor};

/// Default embedding model (all-MiniLM-L6-v2 - 384 dimensions, good balance of speed/quality)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 384;
