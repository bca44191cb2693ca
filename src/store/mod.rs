//! Structured record store: the source of truth for organizations and agents.
//!
//! Two adapters implement [`RecordStore`]:
//! - [`MemoryRecordStore`] keeps records in ordered maps (tests, ephemeral runs)
//! - [`RocksRecordStore`] persists them in RocksDB column families
//!
//! Both key records by canonical address, enforce address uniqueness and the
//! agent-to-organization reference, and answer full-text queries with the
//! tantivy index in [`lexical`].

pub mod lexical;
mod memory;
mod rocks;

pub use memory::MemoryRecordStore;
pub use rocks::RocksRecordStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::model::{Agent, Organization};

/// How a write treats an existing record at the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the existing record (re-registration).
    Upsert,
    /// Fail with `DuplicateAddress` if the address is taken.
    CreateOnly,
}

/// Read/write contract of the structured store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one organization, `NotFound` if absent.
    async fn get_organization(&self, address: &Address) -> Result<Organization>;

    /// All organizations, ascending by address.
    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    /// Insert or replace an organization.
    async fn upsert_organization(&self, org: Organization, mode: WriteMode)
        -> Result<Organization>;

    /// Remove an organization. Fails with `OrganizationNotEmpty` while
    /// agents still reference it.
    async fn delete_organization(&self, address: &Address) -> Result<Organization>;

    /// Fetch one agent, `NotFound` if absent.
    async fn get_agent(&self, address: &Address) -> Result<Agent>;

    /// Agents under an organization, ascending by address. `NotFound` when
    /// the organization itself does not exist.
    async fn list_agents_under_organization(&self, org: &Address) -> Result<Vec<Agent>>;

    /// Every agent, ascending by address.
    async fn list_agents(&self) -> Result<Vec<Agent>>;

    /// Insert or replace an agent. Fails with `UnknownOrganization` when the
    /// address prefix has no organization.
    async fn upsert_agent(&self, agent: Agent, mode: WriteMode) -> Result<Agent>;

    /// Remove an agent and return the removed record.
    async fn delete_agent(&self, address: &Address) -> Result<Agent>;

    /// Full-text relevance search. Scores are only comparable within one
    /// result set; ties are broken by address ascending.
    async fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(Agent, f64)>>;

    /// Agents carrying at least one of `tags` (exact match), ascending by
    /// address.
    async fn find_by_capabilities(&self, tags: &[String]) -> Result<Vec<Agent>> {
        let agents = self.list_agents().await?;
        Ok(agents
            .into_iter()
            .filter(|agent| agent.capabilities.iter().any(|c| tags.contains(c)))
            .collect())
    }
}

/// Which record store adapter to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    RocksDb,
}

/// Record store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// RocksDB directory
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: PathBuf::from("data/records"),
        }
    }
}

/// Open the configured record store.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryRecordStore::new()?)),
        StoreBackend::RocksDb => Ok(Arc::new(RocksRecordStore::open(&config.path)?)),
    }
}
