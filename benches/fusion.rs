use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use agentdns_resolver::search::{reciprocal_rank_fusion, DEFAULT_RRF_K};
use agentdns_resolver::{
    Address, AddressParser, Agent, EmbeddingService, EmbeddingServiceConfig,
    HashEmbeddingProvider, HybridSearchConfig, MemoryRecordStore, MemoryVectorIndex, Organization,
    Resolver, RetryConfig,
};

const DIM: usize = 128;

fn candidate_lists(size: usize) -> Vec<Vec<Address>> {
    let addresses: Vec<Address> = (0..size)
        .map(|i| Address::parse(&format!("agentdns://bench/agent-{:05}", i)).unwrap())
        .collect();
    let lexical = addresses.clone();
    let description: Vec<Address> = addresses.iter().rev().cloned().collect();
    let tags: Vec<Address> = addresses.iter().step_by(2).cloned().collect();
    vec![lexical, description, tags]
}

fn bench_rrf(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf");

    for size in [30, 300, 3000].iter() {
        let lists = candidate_lists(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &lists, |b, lists| {
            b.iter(|| reciprocal_rank_fusion(black_box(lists), DEFAULT_RRF_K));
        });
    }

    group.finish();
}

fn bench_discover(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let retry = RetryConfig::no_retry(5_000);
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
        Arc::new(MemoryVectorIndex::new(DIM)),
        embeddings,
        HybridSearchConfig::default(),
        retry,
    );

    rt.block_on(async {
        resolver
            .register_organization(Organization::new(
                "Bench",
                Address::parse("agentdns://bench").unwrap(),
                "",
            ))
            .await
            .unwrap();
        let topics = ["images", "translation", "weather", "calendars", "documents"];
        for i in 0..500 {
            let topic = topics[i % topics.len()];
            let agent = Agent::new(
                Address::parse(&format!("agentdns://bench/agent-{:05}", i)).unwrap(),
                format!("Agent {}", i),
                format!("Handles {} requests, variant {}", topic, i),
                "https://bench.example",
            )
            .with_capabilities([topic]);
            resolver.register_agent(agent).await.unwrap();
        }
    });

    c.bench_function("discover_500_agents", |b| {
        b.to_async(&rt)
            .iter(|| resolver.discover(black_box("handles weather requests"), 10));
    });
}

criterion_group!(benches, bench_rrf, bench_discover);
criterion_main!(benches);
