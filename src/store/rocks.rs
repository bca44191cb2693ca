//! RocksDB-backed record store.
//!
//! Organizations and agents live in two column families keyed by the UTF-8
//! bytes of their canonical address, values encoded with bincode. Byte order
//! of the keys is the address order, so the agents of `scheme://org` are the
//! contiguous key range starting at `scheme://org/`.
//!
//! The lexical index lives in a sibling directory (`<path>.lexical`). It is
//! rebuilt from the `agents` column family on open when the two disagree on
//! the number of agents.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::lexical::LexicalIndex;
use super::{RecordStore, WriteMode};
use crate::address::Address;
use crate::error::{Error, Result};
use crate::model::{Agent, Organization};

const CF_ORGANIZATIONS: &str = "organizations";
const CF_AGENTS: &str = "agents";

struct Inner {
    db: DB,
    // Serializes read-check-write sequences (uniqueness, organization reference).
    write_lock: Mutex<()>,
    lexical: LexicalIndex,
}

impl Inner {
    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("missing column family '{}'", name)))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, cf: &str, key: &str) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(cf)?, key.as_bytes())?.is_some())
    }

    fn put<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.db.put_cf(self.cf(cf)?, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn delete(&self, cf: &str, key: &str) -> Result<()> {
        self.db.delete_cf(self.cf(cf)?, key.as_bytes())?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &str) -> Result<Vec<T>> {
        let iter = self.db.iterator_cf(
            self.cf(cf)?,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Storage("write lock poisoned".into()))
    }
}

fn agent_prefix(org: &Address) -> String {
    format!("{}/", org)
}

fn lexical_dir(path: &Path) -> PathBuf {
    let mut dir = path.as_os_str().to_owned();
    dir.push(".lexical");
    PathBuf::from(dir)
}

/// Record store persisted in RocksDB.
#[derive(Clone)]
pub struct RocksRecordStore {
    inner: Arc<Inner>,
}

impl RocksRecordStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_ORGANIZATIONS, CF_AGENTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        info!(path = %path.display(), "opened record store");

        let inner = Inner {
            db,
            write_lock: Mutex::new(()),
            lexical: LexicalIndex::open(&lexical_dir(path))?,
        };
        let agents: Vec<Agent> = inner.scan(CF_AGENTS, "")?;
        if inner.lexical.num_docs() != agents.len() as u64 {
            inner.lexical.rebuild(&agents)?;
        }

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    // RocksDB calls block, so they run on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl RecordStore for RocksRecordStore {
    async fn get_organization(&self, address: &Address) -> Result<Organization> {
        let key = address.to_string();
        self.blocking(move |inner| {
            inner
                .get(CF_ORGANIZATIONS, &key)?
                .ok_or(Error::NotFound(key))
        })
        .await
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        self.blocking(|inner| inner.scan(CF_ORGANIZATIONS, "")).await
    }

    async fn upsert_organization(
        &self,
        org: Organization,
        mode: WriteMode,
    ) -> Result<Organization> {
        self.blocking(move |inner| {
            let key = org.address.to_string();
            let _guard = inner.lock()?;
            if mode == WriteMode::CreateOnly && inner.contains(CF_ORGANIZATIONS, &key)? {
                return Err(Error::DuplicateAddress(key));
            }
            inner.put(CF_ORGANIZATIONS, &key, &org)?;
            debug!(address = %key, "stored organization");
            Ok(org)
        })
        .await
    }

    async fn delete_organization(&self, address: &Address) -> Result<Organization> {
        let address = address.clone();
        self.blocking(move |inner| {
            let key = address.to_string();
            let _guard = inner.lock()?;
            let org: Organization = inner
                .get(CF_ORGANIZATIONS, &key)?
                .ok_or_else(|| Error::NotFound(key.clone()))?;
            let agents = inner.scan::<Agent>(CF_AGENTS, &agent_prefix(&address))?.len();
            if agents > 0 {
                return Err(Error::OrganizationNotEmpty {
                    address: key,
                    agents,
                });
            }
            inner.delete(CF_ORGANIZATIONS, &key)?;
            Ok(org)
        })
        .await
    }

    async fn get_agent(&self, address: &Address) -> Result<Agent> {
        let key = address.to_string();
        self.blocking(move |inner| inner.get(CF_AGENTS, &key)?.ok_or(Error::NotFound(key)))
            .await
    }

    async fn list_agents_under_organization(&self, org: &Address) -> Result<Vec<Agent>> {
        let org = org.clone();
        self.blocking(move |inner| {
            if !inner.contains(CF_ORGANIZATIONS, org.as_str())? {
                return Err(Error::NotFound(org.to_string()));
            }
            inner.scan(CF_AGENTS, &agent_prefix(&org))
        })
        .await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.blocking(|inner| inner.scan(CF_AGENTS, "")).await
    }

    async fn upsert_agent(&self, agent: Agent, mode: WriteMode) -> Result<Agent> {
        self.blocking(move |inner| {
            let key = agent.address.to_string();
            let org = agent.organization_address();
            let _guard = inner.lock()?;
            if !inner.contains(CF_ORGANIZATIONS, org.as_str())? {
                return Err(Error::UnknownOrganization(org.to_string()));
            }
            if mode == WriteMode::CreateOnly && inner.contains(CF_AGENTS, &key)? {
                return Err(Error::DuplicateAddress(key));
            }
            inner.lexical.upsert(&agent)?;
            inner.put(CF_AGENTS, &key, &agent)?;
            debug!(address = %key, "stored agent");
            Ok(agent)
        })
        .await
    }

    async fn delete_agent(&self, address: &Address) -> Result<Agent> {
        let key = address.to_string();
        self.blocking(move |inner| {
            let _guard = inner.lock()?;
            let agent: Agent = inner
                .get(CF_AGENTS, &key)?
                .ok_or_else(|| Error::NotFound(key.clone()))?;
            inner.delete(CF_AGENTS, &key)?;
            inner.lexical.delete(&agent.address)?;
            Ok(agent)
        })
        .await
    }

    async fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(Agent, f64)>> {
        let query = query.to_string();
        self.blocking(move |inner| {
            let mut hits = Vec::new();
            for (address, score) in inner.lexical.search(&query, limit)? {
                if let Some(agent) = inner.get::<Agent>(CF_AGENTS, address.as_str())? {
                    hits.push((agent, score));
                }
            }
            Ok(hits)
        })
        .await
    }
}
