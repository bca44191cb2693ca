//! Hybrid search: BM25 lexical matching fused with two vector passes.
//!
//! One query runs three retrieval passes. The lexical pass goes to the
//! record store; the description and tags passes go to the vector index
//! with a single query embedding. Candidate lists are combined with
//! Reciprocal Rank Fusion, truncated, and hydrated from the record store.
//!
//! Failure handling per pass:
//! - embedding failure: search continues on the lexical list alone
//! - vector pass failure: that pass contributes an empty list
//! - lexical pass failure: the search fails
//!
//! Hydration drops candidates whose record is missing (orphaned vectors);
//! any other store error fails the search.
//!
//! With a [`SearchFilter`], candidates outside the organization or above the
//! cost ceiling are removed before the fused list is cut to `limit`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::embedding::{Embedding, EmbeddingService};
use super::fusion::{reciprocal_rank_fusion, FusedCandidate, DEFAULT_RRF_K};
use super::query::{expand_synonyms, normalize_query, KeywordExtractor};
use crate::address::Address;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::model::{Agent, VectorField};
use crate::retry::{retry, RetryConfig};
use crate::store::RecordStore;

/// Default over-fetch multiplier applied to the requested limit.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 3;

const LEXICAL: usize = 0;
const DESCRIPTION: usize = 1;
const TAGS: usize = 2;

/// Ranking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchConfig {
    /// RRF smoothing constant `k`
    pub rrf_k: f64,
    /// Each pass fetches `limit * overfetch_factor` candidates
    pub overfetch_factor: usize,
    /// Expand common abbreviations in the embedded query text
    pub expand_synonyms: bool,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            expand_synonyms: false,
        }
    }
}

impl HybridSearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return Err(Error::Config("search.rrf_k must be a non-negative number".into()));
        }
        if self.overfetch_factor == 0 {
            return Err(Error::Config("search.overfetch_factor must be at least 1".into()));
        }
        Ok(())
    }
}

/// Optional restrictions on discovery results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only agents registered under this organization
    pub organization: Option<Address>,
    /// Only agents whose `token_cost` is at most this
    pub max_token_cost: Option<f64>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.organization.is_none() && self.max_token_cost.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(org) = &self.organization {
            if !org.is_organization() {
                return Err(Error::InvalidQuery(format!(
                    "'{}' is not an organization address",
                    org
                )));
            }
        }
        match self.max_token_cost {
            Some(cost) if !cost.is_finite() || cost < 0.0 => Err(Error::InvalidQuery(
                "max_token_cost must be a non-negative number".into(),
            )),
            _ => Ok(()),
        }
    }

    fn admits_address(&self, address: &Address) -> bool {
        self.organization
            .as_ref()
            .map_or(true, |org| address.organization_address() == *org)
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        self.admits_address(&agent.address)
            && self
                .max_token_cost
                .map_or(true, |max| agent.token_cost <= max)
    }
}

/// A ranked, hydrated search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub agent: Agent,
    /// Fused RRF score, comparable only within one result set
    pub score: f64,
    /// 1-based position in the lexical pass
    pub lexical_rank: Option<usize>,
    /// 1-based position in the description-vector pass
    pub description_rank: Option<usize>,
    /// 1-based position in the tags-vector pass
    pub tags_rank: Option<usize>,
}

/// Hybrid search engine over a record store and a vector index.
pub struct HybridSearch {
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingService>,
    config: HybridSearchConfig,
    retry: RetryConfig,
    keywords: Option<Arc<dyn KeywordExtractor>>,
}

impl HybridSearch {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<EmbeddingService>,
        config: HybridSearchConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            index,
            embeddings,
            config,
            retry,
            keywords: None,
        }
    }

    /// Drive the tags pass from keywords extracted out of the query instead
    /// of the query text itself.
    pub fn with_keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.keywords = Some(extractor);
        self
    }

    /// Rank agents for a natural-language query.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.search_filtered(query, limit, &SearchFilter::default()).await
    }

    /// Rank agents for a natural-language query, keeping only those that
    /// match `filter`.
    pub async fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let query = normalize_query(query)
            .ok_or_else(|| Error::InvalidQuery("query text is empty".into()))?;
        if limit == 0 {
            return Err(Error::InvalidQuery("limit must be positive".into()));
        }
        filter.validate()?;

        let started = Instant::now();
        counter!("agentdns_searches_total").increment(1);
        let candidates = limit.saturating_mul(self.config.overfetch_factor);

        let (lexical, vector) = tokio::join!(
            self.lexical_pass(&query, candidates),
            self.vector_passes(&query, candidates),
        );
        let lexical = lexical?;

        let mut lists: Vec<Vec<Address>> = vec![Vec::new(); 3];
        lists[LEXICAL] = lexical.iter().map(|(agent, _)| agent.address.clone()).collect();
        if let Some((description, tags)) = vector {
            lists[DESCRIPTION] = description;
            lists[TAGS] = tags;
        }

        let mut fused = reciprocal_rank_fusion(&lists, self.config.rrf_k);
        fused.retain(|c| filter.admits_address(&c.address));
        // Cost is only known after hydration, so the cut waits for it.
        if filter.max_token_cost.is_none() {
            fused.truncate(limit);
        }

        let known: HashMap<Address, Agent> = lexical
            .into_iter()
            .map(|(agent, _)| (agent.address.clone(), agent))
            .collect();
        let hydrated = join_all(fused.into_iter().map(|c| self.hydrate(c, &known))).await;
        let mut results = Vec::with_capacity(limit);
        for hit in hydrated {
            if let Some(hit) = hit? {
                if filter.matches(&hit.agent) {
                    results.push(hit);
                }
            }
        }
        results.truncate(limit);

        histogram!("agentdns_search_duration_seconds").record(started.elapsed().as_secs_f64());
        debug!(
            query = %query,
            limit,
            results = results.len(),
            "search complete"
        );
        Ok(results)
    }

    async fn lexical_pass(&self, query: &str, candidates: usize) -> Result<Vec<(Agent, f64)>> {
        let store = self.store.as_ref();
        retry(&self.retry, "lexical_search", move || {
            store.lexical_search(query, candidates)
        })
        .await
    }

    /// Description and tags candidates, or `None` when the query could not
    /// be embedded.
    async fn vector_passes(
        &self,
        query: &str,
        candidates: usize,
    ) -> Option<(Vec<Address>, Vec<Address>)> {
        let text = if self.config.expand_synonyms {
            expand_synonyms(query)
        } else {
            query.to_string()
        };

        let (vector, keyword_vector) = tokio::join!(
            self.embeddings.embed_query(&text),
            self.keyword_vector(query),
        );
        let vector = match vector {
            Ok(vector) => vector,
            Err(err) => {
                counter!("agentdns_searches_degraded_total").increment(1);
                warn!(error = %err, "query embedding failed, ranking on lexical matches only");
                return None;
            }
        };
        let tags_vector = keyword_vector.as_deref().unwrap_or(vector.as_slice());

        let (description, tags) = tokio::join!(
            self.vector_pass(&vector, VectorField::Description, candidates),
            self.vector_pass(tags_vector, VectorField::Tags, candidates),
        );
        Some((description, tags))
    }

    /// Embedding of the extracted query keywords. `None` without an
    /// extractor, when extraction yields nothing, or on any failure; the
    /// tags pass then uses the query embedding.
    async fn keyword_vector(&self, query: &str) -> Option<Embedding> {
        let extractor = self.keywords.as_deref()?;
        let keywords = match retry(&self.retry, "extract_keywords", move || {
            extractor.extract(query)
        })
        .await
        {
            Ok(keywords) => keywords,
            Err(err) => {
                warn!(error = %err, "keyword extraction failed, tags pass uses the query");
                return None;
            }
        };
        let text = normalize_query(&keywords.join(" "))?;
        debug!(keywords = %text, "extracted query keywords");
        match self.embeddings.embed_query(&text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                warn!(error = %err, "keyword embedding failed, tags pass uses the query");
                None
            }
        }
    }

    async fn vector_pass(&self, vector: &[f32], field: VectorField, candidates: usize) -> Vec<Address> {
        let index = self.index.as_ref();
        match retry(&self.retry, "query_similar", move || {
            index.query_similar(vector, field, candidates)
        })
        .await
        {
            Ok(hits) => hits.into_iter().map(|(address, _)| address).collect(),
            Err(err) => {
                warn!(field = field.as_str(), error = %err, "vector pass failed, skipping");
                Vec::new()
            }
        }
    }

    /// Load the agent behind a fused candidate. `Ok(None)` when the record
    /// is gone.
    async fn hydrate(
        &self,
        candidate: FusedCandidate,
        known: &HashMap<Address, Agent>,
    ) -> Result<Option<SearchResult>> {
        let agent = match known.get(&candidate.address) {
            Some(agent) => agent.clone(),
            None => {
                let store = self.store.as_ref();
                let address = &candidate.address;
                match retry(&self.retry, "get_agent", move || store.get_agent(address)).await {
                    Ok(agent) => agent,
                    Err(err) if err.is_not_found() => {
                        counter!("agentdns_search_orphans_total").increment(1);
                        warn!(address = %candidate.address, "dropping orphaned search hit");
                        return Ok(None);
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        Ok(Some(SearchResult {
            agent,
            score: candidate.score,
            lexical_rank: candidate.ranks[LEXICAL],
            description_rank: candidate.ranks[DESCRIPTION],
            tags_rank: candidate.ranks[TAGS],
        }))
    }
}
