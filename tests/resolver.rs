//! End-to-end resolver behaviour over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agentdns_resolver::search::Embedding;
use agentdns_resolver::{
    Address, AddressParser, Agent, AgentInterface, EmbeddingProvider, EmbeddingService,
    EmbeddingServiceConfig, Error, HashEmbeddingProvider, HybridSearchConfig, MemoryRecordStore,
    MemoryVectorIndex, Organization, RecordStore, Resolver, ResolverConfig, Result, RetryConfig,
    SearchFilter, VectorField, VectorIndex, VectorRecord,
};

const DIM: usize = 128;

struct UnavailableProvider;

#[async_trait]
impl EmbeddingProvider for UnavailableProvider {
    fn model_name(&self) -> &str {
        "unavailable"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
        Err(Error::EmbeddingUnavailable("503 from provider".into()))
    }
}

struct StalledProvider;

#[async_trait]
impl EmbeddingProvider for StalledProvider {
    fn model_name(&self) -> &str {
        "stalled"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(texts.iter().map(|_| vec![1.0; DIM]).collect())
    }
}

struct ReadOnlyIndex;

#[async_trait]
impl VectorIndex for ReadOnlyIndex {
    async fn upsert_agent_vectors(&self, _record: VectorRecord) -> Result<()> {
        Err(Error::VectorIndex("collection is read-only".into()))
    }

    async fn query_similar(
        &self,
        _vector: &[f32],
        _field: VectorField,
        _limit: usize,
    ) -> Result<Vec<(Address, f32)>> {
        Ok(Vec::new())
    }

    async fn delete_agent_vectors(&self, _address: &Address) -> Result<()> {
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        timeout_ms: 2_000,
    }
}

struct Harness {
    store: Arc<MemoryRecordStore>,
    index: Arc<dyn VectorIndex>,
    resolver: Resolver,
}

fn harness_with(
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
) -> Harness {
    harness_with_config(provider, index, EmbeddingServiceConfig::hash(DIM))
}

fn harness_with_config(
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    config: EmbeddingServiceConfig,
) -> Harness {
    let store = Arc::new(MemoryRecordStore::new().unwrap());
    let embeddings = Arc::new(EmbeddingService::new(provider, config, fast_retry()).unwrap());
    let resolver = Resolver::new(
        AddressParser::default(),
        store.clone(),
        index.clone(),
        embeddings,
        HybridSearchConfig::default(),
        fast_retry(),
    );
    Harness {
        store,
        index,
        resolver,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(HashEmbeddingProvider::new(DIM)),
        Arc::new(MemoryVectorIndex::new(DIM)),
    )
}

fn org(address: &str, name: &str) -> Organization {
    Organization::new(name, Address::parse(address).unwrap(), "")
}

fn agent(address: &str, name: &str, description: &str, tags: &[&str]) -> Agent {
    Agent::new(
        Address::parse(address).unwrap(),
        name,
        description,
        "https://agents.example/invoke",
    )
    .with_capabilities(tags.iter().copied())
}

async fn seed_testorg(resolver: &Resolver) {
    resolver
        .register_organization(org("agentdns://testorg", "Test Org"))
        .await
        .unwrap();
    let agents = [
        agent(
            "agentdns://testorg/图像处理器_3",
            "图像处理器",
            "An assistant that processes images and recognizes objects in photos",
            &["vision"],
        )
        .with_interface(
            AgentInterface::new("classify", "Label the objects in an image")
                .with_parameter("image_url", "Location of the image"),
        ),
        agent(
            "agentdns://testorg/translator",
            "Translator",
            "Translates documents between natural languages",
            &["translation", "nlp"],
        ),
        agent(
            "agentdns://testorg/scheduler",
            "Scheduler",
            "Books meetings and manages calendars",
            &["calendar"],
        ),
        agent(
            "agentdns://testorg/weather",
            "Weather",
            "Reports weather forecasts for a city",
            &["weather", "forecast"],
        ),
    ];
    for a in agents {
        let reg = resolver.register_agent(a).await.unwrap();
        assert!(reg.is_indexed());
    }
}

#[tokio::test]
async fn test_percent_encoded_resolve_and_discover() {
    let h = harness();
    seed_testorg(&h.resolver).await;

    let resolved = h
        .resolver
        .resolve_agent("agentdns://testorg/%E5%9B%BE%E5%83%8F%E5%A4%84%E7%90%86%E5%99%A8_3")
        .await
        .unwrap();
    assert_eq!(resolved.address.as_str(), "agentdns://testorg/图像处理器_3");
    assert_eq!(resolved.capabilities, vec!["vision".to_string()]);
    assert_eq!(resolved.interfaces[0].parameters["image_url"], "Location of the image");

    let results = h
        .resolver
        .discover("an assistant that processes images", 3)
        .await
        .unwrap();
    assert!(results.len() <= 3);
    assert!(results
        .iter()
        .any(|r| r.agent.address.as_str() == "agentdns://testorg/图像处理器_3"));
    assert_eq!(results[0].agent.name, "图像处理器");
}

#[tokio::test]
async fn test_list_agents_of_empty_organization() {
    let h = harness();
    h.resolver
        .register_organization(org("agentdns://empty", "Empty"))
        .await
        .unwrap();
    let agents = h.resolver.list_agents("agentdns://empty").await.unwrap();
    assert!(agents.is_empty());

    assert!(h
        .resolver
        .list_agents("agentdns://nobody")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_organization_registration_is_an_upsert() {
    let h = harness();
    h.resolver
        .register_organization(org("agentdns://acme", "Acme"))
        .await
        .unwrap();
    h.resolver
        .register_organization(org("agentdns://acme-labs", "Acme Labs"))
        .await
        .unwrap();
    h.resolver
        .register_organization(org("agentdns://acme", "Acme Corp"))
        .await
        .unwrap();

    let orgs = h.resolver.list_organizations().await.unwrap();
    assert_eq!(orgs.len(), 2);
    let acme = h.resolver.resolve_organization("AGENTDNS://acme").await.unwrap();
    assert_eq!(acme.name, "Acme Corp");
}

#[tokio::test]
async fn test_agent_requires_registered_organization() {
    let h = harness();
    let err = h
        .resolver
        .register_agent(agent("agentdns://ghost/a", "A", "Does a", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownOrganization(_)));
    assert!(h.store.list_agents().await.unwrap().is_empty());
    assert_eq!(h.index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_addresses_are_rejected() {
    let h = harness();
    for raw in [
        "",
        "testorg/agent",
        "agentdns://",
        "agentdns:///agent",
        "agentdns://org//agent",
        "agentdns://org/a/b",
        "http://org/agent",
    ] {
        assert!(
            matches!(
                h.resolver.resolve_agent(raw).await,
                Err(Error::MalformedAddress { .. })
            ),
            "expected {:?} to be malformed",
            raw
        );
    }
}

#[tokio::test]
async fn test_discover_degrades_when_embedding_is_unavailable() {
    let h = harness_with(
        Arc::new(UnavailableProvider),
        Arc::new(MemoryVectorIndex::new(DIM)),
    );
    h.resolver
        .register_organization(org("agentdns://testorg", "Test Org"))
        .await
        .unwrap();
    let reg = h
        .resolver
        .register_agent(agent(
            "agentdns://testorg/weather",
            "Weather",
            "Reports weather forecasts",
            &["forecast"],
        ))
        .await
        .unwrap();
    assert!(matches!(reg.index_warning, Some(Error::IndexWriteFailed { .. })));

    let results = h.resolver.discover("weather forecasts", 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].agent.name, "Weather");
    assert_eq!(results[0].lexical_rank, Some(1));
    assert!((results[0].score - 1.0 / 61.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_discover_degrades_when_embedding_times_out() {
    let h = harness_with_config(
        Arc::new(StalledProvider),
        Arc::new(MemoryVectorIndex::new(DIM)),
        EmbeddingServiceConfig {
            timeout_ms: 50,
            ..EmbeddingServiceConfig::hash(DIM)
        },
    );
    h.resolver
        .register_organization(org("agentdns://testorg", "Test Org"))
        .await
        .unwrap();
    for a in [
        agent("agentdns://testorg/weather", "Weather", "Reports weather forecasts", &["forecast"]),
        agent("agentdns://testorg/translator", "Translator", "Translates documents", &["nlp"]),
    ] {
        let reg = h.resolver.register_agent(a).await.unwrap();
        assert!(matches!(reg.index_warning, Some(Error::IndexWriteFailed { .. })));
    }

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        h.resolver.discover("weather forecasts", 5),
    )
    .await
    .expect("discover must not wait for the stalled provider")
    .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].agent.name, "Weather");
    assert_eq!(results[0].lexical_rank, Some(1));
    assert_eq!(results[0].description_rank, None);
    assert_eq!(results[0].tags_rank, None);
}

#[tokio::test]
async fn test_discover_filtered_by_organization_and_cost() {
    let h = harness();
    seed_testorg(&h.resolver).await;
    h.resolver
        .register_organization(org("agentdns://globex", "Globex"))
        .await
        .unwrap();
    h.resolver
        .register_agent(
            agent(
                "agentdns://globex/forecaster",
                "Forecaster",
                "Reports weather forecasts for a city",
                &["weather", "forecast"],
            )
            .with_token_cost(3.0),
        )
        .await
        .unwrap();

    let globex = SearchFilter {
        organization: Some(Address::parse("agentdns://globex").unwrap()),
        max_token_cost: None,
    };
    let results = h
        .resolver
        .discover_filtered("weather forecasts for a city", 5, &globex)
        .await
        .unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.agent.name.as_str()).collect();
    assert_eq!(names, vec!["Forecaster"]);

    let cheap = SearchFilter {
        organization: None,
        max_token_cost: Some(1.0),
    };
    let results = h
        .resolver
        .discover_filtered("weather forecasts for a city", 1, &cheap)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].agent.name, "Weather");

    // an exact address outside the filter resolves to nothing
    let results = h
        .resolver
        .discover_filtered("agentdns://testorg/weather", 5, &globex)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_orphaned_vectors_are_skipped() {
    let h = harness();
    seed_testorg(&h.resolver).await;

    // Remove the structured record behind the resolver's back.
    let orphan = Address::parse("agentdns://testorg/weather").unwrap();
    h.store.delete_agent(&orphan).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), 4);

    let results = h
        .resolver
        .discover("weather forecasts for a city", 10)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.agent.address != orphan));
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_index_failure_is_a_soft_warning() {
    let h = harness_with(Arc::new(HashEmbeddingProvider::new(DIM)), Arc::new(ReadOnlyIndex));
    h.resolver
        .register_organization(org("agentdns://acme", "Acme"))
        .await
        .unwrap();

    let reg = h
        .resolver
        .register_agent(agent("agentdns://acme/bot", "Bot", "Answers questions", &["qa"]))
        .await
        .unwrap();
    assert!(!reg.is_indexed());
    assert!(matches!(reg.index_warning, Some(Error::IndexWriteFailed { .. })));

    // the structured record is kept and still discoverable lexically
    let resolved = h.resolver.resolve_agent("agentdns://acme/bot").await.unwrap();
    assert_eq!(resolved.name, "Bot");
    let found = h.resolver.discover("answers questions", 3).await.unwrap();
    assert_eq!(found[0].agent.name, "Bot");

    let err = h.resolver.reindex_agent("agentdns://acme/bot").await.unwrap_err();
    assert!(matches!(err, Error::IndexWriteFailed { .. }));
    let report = h.resolver.reindex_all().await.unwrap();
    assert_eq!(report.reindexed, 0);
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test]
async fn test_organization_delete_blocked_by_agents() {
    let h = harness();
    seed_testorg(&h.resolver).await;
    let err = h
        .resolver
        .delete_organization("agentdns://testorg")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OrganizationNotEmpty { agents: 4, .. }));
}

#[tokio::test]
async fn test_find_by_capabilities() {
    let h = harness();
    seed_testorg(&h.resolver).await;
    let found = h
        .resolver
        .find_by_capabilities(&["forecast".to_string(), "nlp".to_string()])
        .await
        .unwrap();
    let names: Vec<&str> = found.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Translator", "Weather"]);
}

#[tokio::test]
async fn test_from_in_memory_config() {
    let resolver = Resolver::from_config(&ResolverConfig::in_memory(DIM))
        .await
        .unwrap();
    seed_testorg(&resolver).await;
    let results = resolver.discover("books meetings", 2).await.unwrap();
    assert_eq!(results[0].agent.name, "Scheduler");
}
