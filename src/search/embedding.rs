//! Embedding gateway.
//!
//! [`EmbeddingService`] sits between callers and an [`EmbeddingProvider`].
//! It truncates input, bounds every provider call with a timeout and retry
//! budget, checks what comes back, and L2-normalizes it. A provider that
//! returns the wrong dimension, a non-finite component, or an all-zero
//! vector is reported as [`Error::EmbeddingUnavailable`]; such vectors are
//! never passed on to the index.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{DEFAULT_MODEL, EMBEDDING_DIM};
use crate::error::{Error, Result};
use crate::retry::{retry, RetryConfig};
use crate::store::lexical::tokenize;

/// A dense embedding vector.
pub type Embedding = Vec<f32>;

/// Text-to-vector provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed `texts`, one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

// ========== Hash provider ==========

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic feature-hashing embedder.
///
/// Each lexical token and each character trigram of longer words is hashed
/// into a signed bucket. Needs no model download, which makes it the
/// provider for tests and offline deployments.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
    name: String,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            name: format!("fnv1a-hash-{}", dimension),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let h = fnv1a(feature.as_bytes());
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        for token in tokenize(text) {
            self.add_feature(&mut vector, &token, 1.0);
            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let gram: String = window.iter().collect();
                    self.add_feature(&mut vector, &format!("#{}", gram), 0.5);
                }
            }
        }
        vector
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ========== FastEmbed provider ==========

/// Map a configured model name to a FastEmbed model and its output size.
fn fastembed_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    match name {
        "all-MiniLM-L6-v2" => Some((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
        "multilingual-e5-small" => Some((EmbeddingModel::MultilingualE5Small, 384)),
        _ => None,
    }
}

/// Local ONNX sentence embeddings through FastEmbed.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Load `model_name`, downloading it on first use.
    pub fn new(model_name: &str) -> Result<Self> {
        let (model, dimension) = fastembed_model(model_name)
            .ok_or_else(|| Error::Config(format!("unsupported embedding model: {}", model_name)))?;

        info!(model = model_name, dimension, "loading embedding model");
        let embedding = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| Error::EmbeddingUnavailable(format!("failed to load {}: {}", model_name, e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<Embedding>> {
            let embeddings = model
                .lock()
                .map_err(|_| Error::EmbeddingUnavailable("embedding model lock poisoned".into()))?
                .embed(texts, None)
                .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
            Ok(embeddings)
        })
        .await
        .map_err(|e| Error::EmbeddingUnavailable(format!("embedding task failed: {}", e)))?
    }
}

// ========== Gateway ==========

/// Which provider the gateway builds from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Feature hashing, no model files
    Hash,
    /// FastEmbed ONNX model
    #[default]
    FastEmbed,
}

/// Configuration for the embedding gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingServiceConfig {
    pub provider: EmbeddingProviderKind,
    /// Model name (FastEmbed provider only)
    pub model: String,
    /// Output dimension; must match the provider and the vector index
    pub dimension: usize,
    /// Inputs longer than this many characters are cut before embedding
    pub max_input_chars: usize,
    /// Deadline for one provider call
    pub timeout_ms: u64,
    /// Maximum number of cached query embeddings (0 disables the cache)
    pub cache_capacity: u64,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: DEFAULT_MODEL.to_string(),
            dimension: EMBEDDING_DIM,
            max_input_chars: 2_000,
            timeout_ms: 10_000,
            cache_capacity: 1_024,
        }
    }
}

impl EmbeddingServiceConfig {
    /// Deterministic hash embeddings of the given dimension.
    pub fn hash(dimension: usize) -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: String::new(),
            dimension,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be positive".into()));
        }
        if self.max_input_chars == 0 {
            return Err(Error::Config("embedding.max_input_chars must be positive".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("embedding.timeout_ms must be positive".into()));
        }
        if self.provider == EmbeddingProviderKind::FastEmbed {
            match fastembed_model(&self.model) {
                None => {
                    return Err(Error::Config(format!(
                        "unsupported embedding model: {}",
                        self.model
                    )))
                }
                Some((_, dim)) if dim != self.dimension => {
                    return Err(Error::Config(format!(
                        "model {} produces {}-dimensional vectors, configured {}",
                        self.model, dim, self.dimension
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Embedding gateway shared by registration and search.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingServiceConfig,
    retry: RetryConfig,
    query_cache: Cache<String, Embedding>,
}

impl EmbeddingService {
    /// Wrap an existing provider. Its dimension must match the configuration.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: EmbeddingServiceConfig,
        retry: RetryConfig,
    ) -> Result<Self> {
        if provider.dimension() != config.dimension {
            return Err(Error::Config(format!(
                "provider {} has dimension {}, configured {}",
                provider.model_name(),
                provider.dimension(),
                config.dimension
            )));
        }
        let query_cache = Cache::new(config.cache_capacity);
        Ok(Self {
            provider,
            retry: retry.with_timeout_ms(config.timeout_ms),
            config,
            query_cache,
        })
    }

    /// Build the configured provider and wrap it.
    pub fn from_config(config: EmbeddingServiceConfig, retry: RetryConfig) -> Result<Self> {
        config.validate()?;
        let provider: Arc<dyn EmbeddingProvider> = match config.provider {
            EmbeddingProviderKind::Hash => Arc::new(HashEmbeddingProvider::new(config.dimension)),
            EmbeddingProviderKind::FastEmbed => Arc::new(FastEmbedProvider::new(&config.model)?),
        };
        Self::new(provider, config, retry)
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("provider returned no vector".into()))
    }

    /// Embed several texts in one provider call, preserving order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<String> = texts.iter().map(|t| self.truncate(t)).collect();

        let provider = self.provider.as_ref();
        let batch = &inputs;
        let raw = retry(&self.retry, "embed", move || provider.embed_batch(batch))
            .await
            .map_err(|err| match err {
                Error::EmbeddingUnavailable(_) => err,
                other => Error::EmbeddingUnavailable(other.to_string()),
            })?;

        if raw.len() != inputs.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "provider returned {} vectors for {} inputs",
                raw.len(),
                inputs.len()
            )));
        }
        raw.into_iter().map(|v| self.finalize(v)).collect()
    }

    /// Embed a search query, serving repeats from the cache.
    pub async fn embed_query(&self, query: &str) -> Result<Embedding> {
        if let Some(hit) = self.query_cache.get(query).await {
            debug!("query embedding cache hit");
            return Ok(hit);
        }
        let vector = self.embed(query).await?;
        self.query_cache.insert(query.to_string(), vector.clone()).await;
        Ok(vector)
    }

    fn truncate(&self, text: &str) -> String {
        match text.char_indices().nth(self.config.max_input_chars) {
            Some((cut, _)) => {
                debug!(
                    max_chars = self.config.max_input_chars,
                    "truncating embedding input"
                );
                text[..cut].to_string()
            }
            None => text.to_string(),
        }
    }

    fn finalize(&self, mut vector: Embedding) -> Result<Embedding> {
        if vector.len() != self.config.dimension {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} dimensions, got {}",
                self.config.dimension,
                vector.len()
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::EmbeddingUnavailable("non-finite embedding component".into()));
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            warn!(model = self.provider.model_name(), "provider returned a zero vector");
            return Err(Error::EmbeddingUnavailable("zero embedding vector".into()));
        }
        for x in vector.iter_mut() {
            *x /= norm;
        }
        Ok(vector)
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model", &self.provider.model_name())
            .field("config", &self.config)
            .finish()
    }
}
