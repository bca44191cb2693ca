//! Error types for the resolver.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the resolver and its adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// Address grammar violation. Not retryable; the caller must fix the input.
    #[error("Malformed address '{address}': {reason}")]
    MalformedAddress { address: String, reason: String },

    /// The addressed entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create-only write hit an existing record.
    #[error("Duplicate address: {0}")]
    DuplicateAddress(String),

    /// Agent registration referenced an organization that was never registered.
    #[error("Unknown organization: {0}")]
    UnknownOrganization(String),

    /// Empty query text or non-positive limit.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The embedding provider failed or returned an unusable vector.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Vector upsert failed after the structured write succeeded.
    #[error("Index write failed for '{address}': {reason}")]
    IndexWriteFailed { address: String, reason: String },

    /// A record failed field validation.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Organization deletion blocked by dependent agents.
    #[error("Organization '{address}' still has {agents} agent(s)")]
    OrganizationNotEmpty { address: String, agents: usize },

    /// Structured store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Vector index failure.
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// An external call exceeded its deadline.
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a `MalformedAddress` error.
    pub fn malformed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Whether the adapter boundary may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::VectorIndex(_)
                | Error::EmbeddingUnavailable(_)
                | Error::Timeout { .. }
        )
    }

    /// Whether this is a `NotFound` outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::VectorIndex(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Storage("down".into()).is_retryable());
        assert!(Error::Timeout {
            operation: "embed".into(),
            duration_ms: 10
        }
        .is_retryable());
        assert!(!Error::malformed("x", "bad").is_retryable());
        assert!(!Error::NotFound("agentdns://a".into()).is_retryable());
        assert!(!Error::InvalidQuery("empty".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::OrganizationNotEmpty {
            address: "agentdns://org".into(),
            agents: 2,
        };
        assert_eq!(
            err.to_string(),
            "Organization 'agentdns://org' still has 2 agent(s)"
        );
    }
}
