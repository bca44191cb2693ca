//! AgentDNS resolver.
//!
//! Maps hierarchical agent addresses (`agentdns://org/agent`) to agent
//! records and ranks agents for natural-language queries with a hybrid of
//! BM25 keyword search and two vector similarity passes.
//!
//! The [`Resolver`] is the entry point. It depends only on three narrow
//! interfaces, so every backend can be swapped for an in-memory one:
//! - [`RecordStore`]: organizations and agents, the source of truth
//! - [`VectorIndex`]: derived description and tag embeddings
//! - [`EmbeddingProvider`]: text to vector

pub mod address;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod resolver;
pub mod retry;
pub mod search;
pub mod store;

pub use address::{Address, AddressKind, AddressParser, DEFAULT_SCHEME};
pub use config::ResolverConfig;
pub use error::{Error, Result};
pub use index::{IndexBackend, IndexConfig, MemoryVectorIndex, QdrantVectorIndex, VectorIndex};
pub use model::{Agent, AgentInterface, Organization, VectorField, VectorRecord};
pub use resolver::{ReindexReport, Registration, Resolver};
pub use retry::RetryConfig;
pub use search::{
    EmbeddingProvider, EmbeddingProviderKind, EmbeddingService, EmbeddingServiceConfig,
    HashEmbeddingProvider, HybridSearch, HybridSearchConfig, KeywordExtractor, SearchFilter,
    SearchResult,
};
pub use store::{
    MemoryRecordStore, RecordStore, RocksRecordStore, StoreBackend, StoreConfig, WriteMode,
};
