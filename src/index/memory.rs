//! In-memory vector index with exact cosine search.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{cosine_similarity, VectorIndex};
use crate::address::Address;
use crate::error::{Error, Result};
use crate::model::{VectorField, VectorRecord};

/// Brute-force vector index over a hash map.
pub struct MemoryVectorIndex {
    dimension: usize,
    records: RwLock<HashMap<Address, VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the stored record for an address.
    pub async fn get(&self, address: &Address) -> Option<VectorRecord> {
        self.records.read().await.get(address).cloned()
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(Error::VectorIndex(format!(
                "vector dimension {} does not match index dimension {}",
                len, self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert_agent_vectors(&self, record: VectorRecord) -> Result<()> {
        self.check_dimension(record.description_vector.len())?;
        self.check_dimension(record.tags_vector.len())?;
        self.records
            .write()
            .await
            .insert(record.address.clone(), record);
        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        field: VectorField,
        limit: usize,
    ) -> Result<Vec<(Address, f32)>> {
        self.check_dimension(vector.len())?;
        let records = self.records.read().await;
        let mut hits: Vec<(Address, f32)> = records
            .values()
            .map(|record| {
                let stored = match field {
                    VectorField::Description => &record.description_vector,
                    VectorField::Tags => &record.tags_vector,
                };
                (record.address.clone(), cosine_similarity(vector, stored))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_agent_vectors(&self, address: &Address) -> Result<()> {
        self.records.write().await.remove(address);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, description: [f32; 2], tags: [f32; 2]) -> VectorRecord {
        VectorRecord {
            address: Address::parse(&format!("agentdns://org/{}", path)).unwrap(),
            agent_name: path.to_string(),
            description: String::new(),
            tags: String::new(),
            description_vector: description.to_vec(),
            tags_vector: tags.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity_per_field() {
        let index = MemoryVectorIndex::new(2);
        index.upsert_agent_vectors(record("a", [1.0, 0.0], [0.0, 1.0])).await.unwrap();
        index.upsert_agent_vectors(record("b", [0.0, 1.0], [1.0, 0.0])).await.unwrap();

        let by_desc = index
            .query_similar(&[1.0, 0.1], VectorField::Description, 10)
            .await
            .unwrap();
        assert_eq!(by_desc[0].0.as_str(), "agentdns://org/a");

        let by_tags = index
            .query_similar(&[1.0, 0.1], VectorField::Tags, 1)
            .await
            .unwrap();
        assert_eq!(by_tags.len(), 1);
        assert_eq!(by_tags[0].0.as_str(), "agentdns://org/b");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_is_idempotent() {
        let index = MemoryVectorIndex::new(2);
        index.upsert_agent_vectors(record("a", [1.0, 0.0], [1.0, 0.0])).await.unwrap();
        index.upsert_agent_vectors(record("a", [0.0, 1.0], [0.0, 1.0])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        let addr = Address::parse("agentdns://org/a").unwrap();
        assert_eq!(index.get(&addr).await.unwrap().description_vector, vec![0.0, 1.0]);

        index.delete_agent_vectors(&addr).await.unwrap();
        index.delete_agent_vectors(&addr).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let index = MemoryVectorIndex::new(3);
        let err = index
            .upsert_agent_vectors(record("a", [1.0, 0.0], [1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VectorIndex(_)));
        assert!(index
            .query_similar(&[1.0], VectorField::Tags, 1)
            .await
            .is_err());
    }
}
