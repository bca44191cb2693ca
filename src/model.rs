//! Records held by the structured store and the vector index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};

/// A registered organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Display name
    pub name: String,
    /// `scheme://org` address, unique across organizations
    pub address: Address,
    /// Free-text description
    #[serde(default)]
    pub description: String,
}

impl Organization {
    pub fn new(name: impl Into<String>, address: Address, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address,
            description: description.into(),
        }
    }

    /// Check field-level invariants.
    pub fn validate(&self) -> Result<()> {
        if !self.address.is_organization() {
            return Err(Error::malformed(
                self.address.as_str(),
                "organization address must have exactly one segment",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRecord(format!(
                "organization '{}' has an empty name",
                self.address
            )));
        }
        Ok(())
    }
}

/// One callable interface exposed by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentInterface {
    pub name: String,
    pub description: String,
    /// Parameter name to human-readable purpose
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl AgentInterface {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, purpose: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), purpose.into());
        self
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// `scheme://org/agent` address, unique across agents
    pub address: Address,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub interfaces: Vec<AgentInterface>,
    /// Invocation endpoint
    pub urls: String,
    #[serde(default)]
    pub token_cost: f64,
    /// Free-text capability tags
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Agent {
    pub fn new(
        address: Address,
        name: impl Into<String>,
        description: impl Into<String>,
        urls: impl Into<String>,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            description: description.into(),
            interfaces: Vec::new(),
            urls: urls.into(),
            token_cost: 0.0,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interface(mut self, interface: AgentInterface) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_token_cost(mut self, token_cost: f64) -> Self {
        self.token_cost = token_cost;
        self
    }

    /// Address of the owning organization.
    pub fn organization_address(&self) -> Address {
        self.address.organization_address()
    }

    /// Check field-level invariants. Organization existence is checked by
    /// the store.
    pub fn validate(&self) -> Result<()> {
        if !self.address.is_agent() {
            return Err(Error::malformed(
                self.address.as_str(),
                "agent address must have exactly two segments",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRecord(format!(
                "agent '{}' has an empty name",
                self.address
            )));
        }
        if self.urls.trim().is_empty() {
            return Err(Error::InvalidRecord(format!(
                "agent '{}' has no invocation endpoint",
                self.address
            )));
        }
        if !self.token_cost.is_finite() || self.token_cost < 0.0 {
            return Err(Error::InvalidRecord(format!(
                "agent '{}' has invalid token cost {}",
                self.address, self.token_cost
            )));
        }
        Ok(())
    }

    /// Text embedded into the description vector.
    pub fn description_text(&self) -> String {
        if self.description.trim().is_empty() {
            self.name.clone()
        } else {
            self.description.clone()
        }
    }

    /// Text embedded into the tags vector. Agents without tags fall back to
    /// their name so the vector is never built from empty input.
    pub fn tags_text(&self) -> String {
        let tags: Vec<&str> = self
            .capabilities
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            self.name.clone()
        } else {
            tags.join(" ")
        }
    }
}

/// Derived vector-index entry for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub address: Address,
    pub agent_name: String,
    pub description: String,
    pub tags: String,
    pub description_vector: Vec<f32>,
    pub tags_vector: Vec<f32>,
}

impl VectorRecord {
    pub fn from_agent(agent: &Agent, description_vector: Vec<f32>, tags_vector: Vec<f32>) -> Self {
        Self {
            address: agent.address.clone(),
            agent_name: agent.name.clone(),
            description: agent.description.clone(),
            tags: agent.tags_text(),
            description_vector,
            tags_vector,
        }
    }
}

/// Which vector field a similarity query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorField {
    Description,
    Tags,
}

impl VectorField {
    /// Field name in the index schema.
    pub fn as_str(self) -> &'static str {
        match self {
            VectorField::Description => "description_vector",
            VectorField::Tags => "tags_vector",
        }
    }
}
