//! The resolver: address lookups, registration, and discovery.
//!
//! Structured records are written first and are the source of truth. Vector
//! writes follow as a second step; when they fail the structured write
//! still stands and the caller gets the failure back as a warning on the
//! [`Registration`]. The index for that address stays stale until
//! [`Resolver::reindex_agent`] or [`Resolver::reindex_all`] runs.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::address::{Address, AddressParser};
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::index::{connect_index, VectorIndex};
use crate::model::{Agent, Organization, VectorRecord};
use crate::retry::{retry, RetryConfig};
use crate::search::{
    EmbeddingService, HybridSearch, HybridSearchConfig, KeywordExtractor, SearchFilter,
    SearchResult,
};
use crate::store::{open_store, RecordStore, WriteMode};

/// Outcome of a write whose structured part succeeded.
#[derive(Debug)]
pub struct Registration<T> {
    /// The record as stored
    pub record: T,
    /// Set when the vector index could not be updated
    pub index_warning: Option<Error>,
}

impl<T> Registration<T> {
    fn clean(record: T) -> Self {
        Self {
            record,
            index_warning: None,
        }
    }

    /// Whether the vector index reflects this write.
    pub fn is_indexed(&self) -> bool {
        self.index_warning.is_none()
    }
}

/// Result of a full reindex.
#[derive(Debug, Default)]
pub struct ReindexReport {
    pub reindexed: usize,
    pub failures: Vec<(Address, Error)>,
}

/// Entry point for every resolver operation.
pub struct Resolver {
    parser: AddressParser,
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<EmbeddingService>,
    search: HybridSearch,
    retry: RetryConfig,
}

impl Resolver {
    pub fn new(
        parser: AddressParser,
        store: Arc<dyn RecordStore>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<EmbeddingService>,
        search_config: HybridSearchConfig,
        retry: RetryConfig,
    ) -> Self {
        let search = HybridSearch::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&embeddings),
            search_config,
            retry.clone(),
        );
        Self {
            parser,
            store,
            index,
            embeddings,
            search,
            retry,
        }
    }

    /// Open the configured stores and embedding provider.
    pub async fn from_config(config: &ResolverConfig) -> Result<Self> {
        config.validate()?;
        let parser = AddressParser::new(&config.scheme)?;
        let store = open_store(&config.store)?;
        let embeddings = Arc::new(EmbeddingService::from_config(
            config.embedding.clone(),
            config.retry.clone(),
        )?);
        let index = connect_index(&config.index, embeddings.dimension()).await?;
        info!(
            scheme = %config.scheme,
            model = embeddings.model_name(),
            "resolver ready"
        );
        Ok(Self::new(
            parser,
            store,
            index,
            embeddings,
            config.search.clone(),
            config.retry.clone(),
        ))
    }

    pub fn parser(&self) -> &AddressParser {
        &self.parser
    }

    /// Drive the tags pass of `discover` from extracted query keywords.
    pub fn with_keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.search = self.search.with_keyword_extractor(extractor);
        self
    }

    // ========== Lookups ==========

    /// Resolve an agent address to its record.
    pub async fn resolve_agent(&self, address: &str) -> Result<Agent> {
        let address = self.parser.parse_agent(address)?;
        self.fetch_agent(&address).await
    }

    /// Resolve an organization address to its record.
    pub async fn resolve_organization(&self, address: &str) -> Result<Organization> {
        let address = self.parser.parse_organization(address)?;
        let store = self.store.as_ref();
        let target = &address;
        retry(&self.retry, "get_organization", move || {
            store.get_organization(target)
        })
        .await
    }

    /// Agents of one organization, ascending by address. An organization
    /// without agents yields an empty list.
    pub async fn list_agents(&self, organization: &str) -> Result<Vec<Agent>> {
        let address = self.parser.parse_organization(organization)?;
        let store = self.store.as_ref();
        let target = &address;
        retry(&self.retry, "list_agents", move || {
            store.list_agents_under_organization(target)
        })
        .await
    }

    /// All organizations, ascending by address.
    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let store = self.store.as_ref();
        retry(&self.retry, "list_organizations", move || {
            store.list_organizations()
        })
        .await
    }

    /// Agents carrying any of `tags`, ascending by address.
    pub async fn find_by_capabilities(&self, tags: &[String]) -> Result<Vec<Agent>> {
        let store = self.store.as_ref();
        retry(&self.retry, "find_by_capabilities", move || {
            store.find_by_capabilities(tags)
        })
        .await
    }

    /// Rank agents for a natural-language query.
    ///
    /// A query that is itself an agent address is resolved directly: a hit
    /// is the only result, with score 1.0, and a miss yields no results.
    pub async fn discover(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.discover_filtered(query, limit, &SearchFilter::default())
            .await
    }

    /// [`discover`](Self::discover) restricted to agents matching `filter`.
    pub async fn discover_filtered(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        if limit > 0 {
            if let Ok(address) = self.parser.parse_agent(query.trim()) {
                debug!(address = %address, "discover query is an agent address");
                filter.validate()?;
                return match self.fetch_agent(&address).await {
                    Ok(agent) if !filter.matches(&agent) => Ok(Vec::new()),
                    Ok(agent) => Ok(vec![SearchResult {
                        agent,
                        score: 1.0,
                        lexical_rank: None,
                        description_rank: None,
                        tags_rank: None,
                    }]),
                    Err(err) if err.is_not_found() => Ok(Vec::new()),
                    Err(err) => Err(err),
                };
            }
        }
        self.search.search_filtered(query, limit, filter).await
    }

    // ========== Writes ==========

    /// Insert or update an organization.
    pub async fn register_organization(&self, org: Organization) -> Result<Organization> {
        self.write_organization(org, WriteMode::Upsert).await
    }

    /// Insert an organization, failing with `DuplicateAddress` if it exists.
    pub async fn create_organization(&self, org: Organization) -> Result<Organization> {
        self.write_organization(org, WriteMode::CreateOnly).await
    }

    /// Insert or update an agent, then refresh its vectors.
    pub async fn register_agent(&self, agent: Agent) -> Result<Registration<Agent>> {
        self.write_agent(agent, WriteMode::Upsert).await
    }

    /// Insert an agent, failing with `DuplicateAddress` if it exists.
    pub async fn create_agent(&self, agent: Agent) -> Result<Registration<Agent>> {
        self.write_agent(agent, WriteMode::CreateOnly).await
    }

    /// Remove an agent record, then its vectors.
    pub async fn delete_agent(&self, address: &str) -> Result<Registration<Agent>> {
        let address = self.parser.parse_agent(address)?;
        let store = self.store.as_ref();
        let target = &address;
        let removed = retry(&self.retry, "delete_agent", move || store.delete_agent(target)).await?;
        info!(address = %address, "agent deleted");

        let index = self.index.as_ref();
        let outcome = retry(&self.retry, "delete_agent_vectors", move || {
            index.delete_agent_vectors(target)
        })
        .await;
        Ok(self.with_index_outcome(removed, outcome))
    }

    /// Remove an organization. Fails with `OrganizationNotEmpty` while it
    /// still has agents.
    pub async fn delete_organization(&self, address: &str) -> Result<Organization> {
        let address = self.parser.parse_organization(address)?;
        let store = self.store.as_ref();
        let target = &address;
        let removed = retry(&self.retry, "delete_organization", move || {
            store.delete_organization(target)
        })
        .await?;
        info!(address = %address, "organization deleted");
        Ok(removed)
    }

    // ========== Reconciliation ==========

    /// Re-embed one agent from its structured record. Index failures are
    /// returned as `IndexWriteFailed`.
    pub async fn reindex_agent(&self, address: &str) -> Result<Agent> {
        let address = self.parser.parse_agent(address)?;
        let agent = self.fetch_agent(&address).await?;
        self.index_agent(&agent).await.map_err(|err| index_write_failed(&address, err))?;
        Ok(agent)
    }

    /// Re-embed every agent. Per-agent failures are collected, not fatal.
    pub async fn reindex_all(&self) -> Result<ReindexReport> {
        let store = self.store.as_ref();
        let agents = retry(&self.retry, "list_agents", move || store.list_agents()).await?;

        let mut report = ReindexReport::default();
        for agent in agents {
            match self.index_agent(&agent).await {
                Ok(()) => report.reindexed += 1,
                Err(err) => {
                    warn!(address = %agent.address, error = %err, "reindex failed");
                    report
                        .failures
                        .push((agent.address.clone(), index_write_failed(&agent.address, err)));
                }
            }
        }
        info!(
            reindexed = report.reindexed,
            failed = report.failures.len(),
            "reindex complete"
        );
        Ok(report)
    }

    // ========== Internals ==========

    async fn fetch_agent(&self, address: &Address) -> Result<Agent> {
        let store = self.store.as_ref();
        retry(&self.retry, "get_agent", move || store.get_agent(address)).await
    }

    fn check_scheme(&self, address: &Address) -> Result<()> {
        match self.parser.scheme() {
            Some(expected) if address.scheme() != expected => Err(Error::malformed(
                address.as_str(),
                format!("expected scheme '{}'", expected),
            )),
            _ => Ok(()),
        }
    }

    /// Create-only writes are never retried.
    fn write_policy(&self, mode: WriteMode) -> RetryConfig {
        match mode {
            WriteMode::Upsert => self.retry.clone(),
            WriteMode::CreateOnly => RetryConfig::no_retry(self.retry.timeout_ms),
        }
    }

    async fn write_organization(&self, org: Organization, mode: WriteMode) -> Result<Organization> {
        self.check_scheme(&org.address)?;
        org.validate()?;

        let store = self.store.as_ref();
        let record = &org;
        let stored = retry(&self.write_policy(mode), "upsert_organization", move || {
            store.upsert_organization(record.clone(), mode)
        })
        .await?;
        info!(address = %stored.address, "organization registered");
        Ok(stored)
    }

    async fn write_agent(&self, agent: Agent, mode: WriteMode) -> Result<Registration<Agent>> {
        self.check_scheme(&agent.address)?;
        agent.validate()?;

        let store = self.store.as_ref();
        let record = &agent;
        let stored = retry(&self.write_policy(mode), "upsert_agent", move || {
            store.upsert_agent(record.clone(), mode)
        })
        .await?;
        info!(address = %stored.address, "agent registered");

        let outcome = self.index_agent(&stored).await;
        Ok(self.with_index_outcome(stored, outcome))
    }

    /// Embed description and tags in one batch and upsert both vectors.
    async fn index_agent(&self, agent: &Agent) -> Result<()> {
        let mut vectors = self
            .embeddings
            .embed_batch(&[agent.description_text(), agent.tags_text()])
            .await?;
        let tags_vector = vectors.pop();
        let description_vector = vectors.pop();
        let (description_vector, tags_vector) = match (description_vector, tags_vector) {
            (Some(d), Some(t)) => (d, t),
            _ => return Err(Error::EmbeddingUnavailable("missing agent vectors".into())),
        };

        let record = VectorRecord::from_agent(agent, description_vector, tags_vector);
        let index = self.index.as_ref();
        let record = &record;
        retry(&self.retry, "upsert_agent_vectors", move || {
            index.upsert_agent_vectors(record.clone())
        })
        .await?;
        debug!(address = %agent.address, "agent vectors indexed");
        Ok(())
    }

    fn with_index_outcome(&self, agent: Agent, outcome: Result<()>) -> Registration<Agent> {
        match outcome {
            Ok(()) => Registration::clean(agent),
            Err(err) => {
                counter!("agentdns_index_write_failures_total").increment(1);
                warn!(
                    address = %agent.address,
                    error = %err,
                    "vector index not updated, record is stored"
                );
                let warning = index_write_failed(&agent.address, err);
                Registration {
                    record: agent,
                    index_warning: Some(warning),
                }
            }
        }
    }
}

fn index_write_failed(address: &Address, err: Error) -> Error {
    match err {
        Error::IndexWriteFailed { .. } => err,
        other => Error::IndexWriteFailed {
            address: address.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryVectorIndex;
    use crate::search::{EmbeddingServiceConfig, HashEmbeddingProvider};
    use crate::store::MemoryRecordStore;

    const DIM: usize = 32;

    fn resolver() -> (Arc<MemoryVectorIndex>, Resolver) {
        let retry = RetryConfig::no_retry(1_000);
        let index = Arc::new(MemoryVectorIndex::new(DIM));
        let embeddings = Arc::new(
            EmbeddingService::new(
                Arc::new(HashEmbeddingProvider::new(DIM)),
                EmbeddingServiceConfig::hash(DIM),
                retry.clone(),
            )
            .unwrap(),
        );
        let resolver = Resolver::new(
            AddressParser::default(),
            Arc::new(MemoryRecordStore::new().unwrap()),
            index.clone(),
            embeddings,
            HybridSearchConfig::default(),
            retry,
        );
        (index, resolver)
    }

    fn org(name: &str) -> Organization {
        Organization::new(name, Address::parse(&format!("agentdns://{}", name)).unwrap(), "")
    }

    fn agent(path: &str) -> Agent {
        Agent::new(
            Address::parse(&format!("agentdns://{}", path)).unwrap(),
            "Agent",
            "Does things",
            "https://example.com",
        )
    }

    #[tokio::test]
    async fn test_register_agent_indexes_vectors() {
        let (index, resolver) = resolver();
        resolver.register_organization(org("acme")).await.unwrap();
        let reg = resolver.register_agent(agent("acme/bot")).await.unwrap();
        assert!(reg.is_indexed());
        assert!(index.get(&reg.record.address).await.is_some());
    }

    #[tokio::test]
    async fn test_rejects_foreign_scheme() {
        let (_, resolver) = resolver();
        let foreign = Organization::new(
            "x",
            AddressParser::new("other").unwrap().parse("other://x").unwrap(),
            "",
        );
        let err = resolver.register_organization(foreign).await.unwrap_err();
        assert!(matches!(err, Error::MalformedAddress { .. }));
    }

    #[tokio::test]
    async fn test_rejects_invalid_records() {
        let (_, resolver) = resolver();
        resolver.register_organization(org("acme")).await.unwrap();
        let mut bad = agent("acme/bot");
        bad.urls.clear();
        assert!(matches!(
            resolver.register_agent(bad).await,
            Err(Error::InvalidRecord(_))
        ));
        assert!(resolver.list_agents("agentdns://acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_only_paths() {
        let (_, resolver) = resolver();
        resolver.create_organization(org("acme")).await.unwrap();
        assert!(matches!(
            resolver.create_organization(org("acme")).await,
            Err(Error::DuplicateAddress(_))
        ));
        resolver.create_agent(agent("acme/bot")).await.unwrap();
        assert!(matches!(
            resolver.create_agent(agent("acme/bot")).await,
            Err(Error::DuplicateAddress(_))
        ));
        // upsert still succeeds on the same address
        resolver.register_agent(agent("acme/bot")).await.unwrap();
    }

    #[tokio::test]
    async fn test_lookups_check_address_kind() {
        let (_, resolver) = resolver();
        assert!(matches!(
            resolver.resolve_agent("agentdns://acme").await,
            Err(Error::MalformedAddress { .. })
        ));
        assert!(matches!(
            resolver.resolve_organization("agentdns://acme/bot").await,
            Err(Error::MalformedAddress { .. })
        ));
        assert!(resolver
            .resolve_agent("agentdns://acme/bot")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_delete_agent_removes_vectors() {
        let (index, resolver) = resolver();
        resolver.register_organization(org("acme")).await.unwrap();
        resolver.register_agent(agent("acme/bot")).await.unwrap();

        let removed = resolver.delete_agent("agentdns://acme/bot").await.unwrap();
        assert!(removed.is_indexed());
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(resolver
            .delete_agent("agentdns://acme/bot")
            .await
            .unwrap_err()
            .is_not_found());

        resolver.delete_organization("agentdns://acme").await.unwrap();
        assert!(resolver.list_organizations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_short_circuits_agent_addresses() {
        let (_, resolver) = resolver();
        resolver.register_organization(org("acme")).await.unwrap();
        resolver.register_agent(agent("acme/bot")).await.unwrap();

        let hit = resolver.discover("agentdns://acme/bot", 5).await.unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].score, 1.0);

        let miss = resolver.discover("agentdns://acme/ghost", 5).await.unwrap();
        assert!(miss.is_empty());

        assert!(matches!(
            resolver.discover("agentdns://acme/bot", 0).await,
            Err(Error::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_reindex_all_restores_missing_vectors() {
        let (index, resolver) = resolver();
        resolver.register_organization(org("acme")).await.unwrap();
        resolver.register_agent(agent("acme/a")).await.unwrap();
        resolver.register_agent(agent("acme/b")).await.unwrap();
        index
            .delete_agent_vectors(&Address::parse("agentdns://acme/a").unwrap())
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        let report = resolver.reindex_all().await.unwrap();
        assert_eq!(report.reindexed, 2);
        assert!(report.failures.is_empty());
        assert_eq!(index.count().await.unwrap(), 2);

        resolver.reindex_agent("agentdns://acme/a").await.unwrap();
    }
}
