//! Qdrant-backed vector index.
//!
//! One collection holds one point per agent with two named vectors,
//! `description_vector` and `tags_vector`, both cosine. Point ids are UUIDv5
//! of the canonical address so re-upserting an address overwrites its point.

use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, NamedVectors,
    PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    VectorsConfigBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{IndexConfig, VectorIndex};
use crate::address::{Address, AddressParser};
use crate::error::{Error, Result};
use crate::model::{VectorField, VectorRecord};

const ADDRESS_FIELD: &str = "address";

/// Vector index stored in a Qdrant collection.
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantVectorIndex {
    /// Connect and create the collection if it does not exist yet.
    pub async fn connect(config: &IndexConfig, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let index = Self {
            client,
            collection: config.collection.clone(),
            dimension,
        };
        index.ensure_collection().await?;
        Ok(index)
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(self.collection.clone()).await? {
            debug!(collection = %self.collection, "vector collection exists");
            return Ok(());
        }

        let mut vectors = VectorsConfigBuilder::default();
        for field in [VectorField::Description, VectorField::Tags] {
            vectors.add_named_vector_params(
                field.as_str(),
                VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
            );
        }
        self.client
            .create_collection(CreateCollectionBuilder::new(&self.collection).vectors_config(vectors))
            .await?;
        info!(
            collection = %self.collection,
            dimension = self.dimension,
            "created vector collection"
        );
        Ok(())
    }

    fn point_id(address: &Address) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, address.as_str().as_bytes()).to_string()
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(Error::VectorIndex(format!(
                "vector dimension {} does not match collection dimension {}",
                len, self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert_agent_vectors(&self, record: VectorRecord) -> Result<()> {
        self.check_dimension(record.description_vector.len())?;
        self.check_dimension(record.tags_vector.len())?;

        let payload = Payload::try_from(serde_json::json!({
            ADDRESS_FIELD: record.address.as_str(),
            "agent_name": record.agent_name,
            "description": record.description,
            "tags": record.tags,
        }))?;
        let vectors = NamedVectors::default()
            .add_vector(VectorField::Description.as_str(), record.description_vector)
            .add_vector(VectorField::Tags.as_str(), record.tags_vector);
        let point = PointStruct::new(Self::point_id(&record.address), vectors, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await?;
        debug!(address = %record.address, "upserted agent vectors");
        Ok(())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        field: VectorField,
        limit: usize,
    ) -> Result<Vec<(Address, f32)>> {
        self.check_dimension(vector.len())?;
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                    .vector_name(field.as_str())
                    .with_payload(true),
            )
            .await?;

        let parser = AddressParser::any();
        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let raw = match point.payload.get(ADDRESS_FIELD).and_then(|v| v.kind.as_ref()) {
                Some(Kind::StringValue(raw)) => raw,
                _ => {
                    warn!(collection = %self.collection, "point without address payload");
                    continue;
                }
            };
            match parser.parse(raw) {
                Ok(address) => hits.push((address, point.score)),
                Err(err) => warn!(error = %err, "skipping point with malformed address"),
            }
        }
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    async fn delete_agent_vectors(&self, address: &Address) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList {
                        ids: vec![Self::point_id(address).into()],
                    })
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable_per_address() {
        let a = Address::parse("agentdns://org/图像处理器_3").unwrap();
        let b = Address::parse("agentdns://org/%E5%9B%BE%E5%83%8F%E5%A4%84%E7%90%86%E5%99%A8_3")
            .unwrap();
        let c = Address::parse("agentdns://org/other").unwrap();
        assert_eq!(QdrantVectorIndex::point_id(&a), QdrantVectorIndex::point_id(&b));
        assert_ne!(QdrantVectorIndex::point_id(&a), QdrantVectorIndex::point_id(&c));
    }
}
