//! In-memory record store.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::lexical::LexicalIndex;
use super::{RecordStore, WriteMode};
use crate::address::Address;
use crate::error::{Error, Result};
use crate::model::{Agent, Organization};

#[derive(Default)]
struct Tables {
    organizations: BTreeMap<Address, Organization>,
    agents: BTreeMap<Address, Agent>,
}

impl Tables {
    fn agents_under<'a>(&'a self, org: &Address) -> impl Iterator<Item = &'a Agent> + 'a {
        let prefix = format!("{}/", org);
        self.agents
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |(key, _)| key.as_str().starts_with(&prefix))
            .map(|(_, agent)| agent)
    }
}

/// Record store backed by ordered in-process maps and an in-RAM lexical
/// index.
///
/// One lock guards both tables so the organization check and the agent
/// write in `upsert_agent` happen atomically. Agent writes update the
/// lexical index while that lock is held.
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
    lexical: LexicalIndex,
}

impl MemoryRecordStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tables: RwLock::new(Tables::default()),
            lexical: LexicalIndex::in_memory()?,
        })
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_organization(&self, address: &Address) -> Result<Organization> {
        self.tables
            .read()
            .await
            .organizations
            .get(address)
            .cloned()
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        Ok(self
            .tables
            .read()
            .await
            .organizations
            .values()
            .cloned()
            .collect())
    }

    async fn upsert_organization(
        &self,
        org: Organization,
        mode: WriteMode,
    ) -> Result<Organization> {
        let mut tables = self.tables.write().await;
        if mode == WriteMode::CreateOnly && tables.organizations.contains_key(&org.address) {
            return Err(Error::DuplicateAddress(org.address.to_string()));
        }
        debug!(address = %org.address, "upserting organization");
        tables.organizations.insert(org.address.clone(), org.clone());
        Ok(org)
    }

    async fn delete_organization(&self, address: &Address) -> Result<Organization> {
        let mut tables = self.tables.write().await;
        if !tables.organizations.contains_key(address) {
            return Err(Error::NotFound(address.to_string()));
        }
        let agents = tables.agents_under(address).count();
        if agents > 0 {
            return Err(Error::OrganizationNotEmpty {
                address: address.to_string(),
                agents,
            });
        }
        tables
            .organizations
            .remove(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    async fn get_agent(&self, address: &Address) -> Result<Agent> {
        self.tables
            .read()
            .await
            .agents
            .get(address)
            .cloned()
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    async fn list_agents_under_organization(&self, org: &Address) -> Result<Vec<Agent>> {
        let tables = self.tables.read().await;
        if !tables.organizations.contains_key(org) {
            return Err(Error::NotFound(org.to_string()));
        }
        Ok(tables.agents_under(org).cloned().collect())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.tables.read().await.agents.values().cloned().collect())
    }

    async fn upsert_agent(&self, agent: Agent, mode: WriteMode) -> Result<Agent> {
        let mut tables = self.tables.write().await;
        let org = agent.organization_address();
        if !tables.organizations.contains_key(&org) {
            return Err(Error::UnknownOrganization(org.to_string()));
        }
        if mode == WriteMode::CreateOnly && tables.agents.contains_key(&agent.address) {
            return Err(Error::DuplicateAddress(agent.address.to_string()));
        }
        debug!(address = %agent.address, "upserting agent");
        self.lexical.upsert(&agent)?;
        tables.agents.insert(agent.address.clone(), agent.clone());
        Ok(agent)
    }

    async fn delete_agent(&self, address: &Address) -> Result<Agent> {
        let mut tables = self.tables.write().await;
        if !tables.agents.contains_key(address) {
            return Err(Error::NotFound(address.to_string()));
        }
        self.lexical.delete(address)?;
        tables
            .agents
            .remove(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    async fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(Agent, f64)>> {
        let tables = self.tables.read().await;
        let hits = self.lexical.search(query, limit)?;
        Ok(hits
            .into_iter()
            .filter_map(|(address, score)| {
                tables.agents.get(&address).map(|a| (a.clone(), score))
            })
            .collect())
    }
}
