use thiserror::Error;

/// Errors raised by the catalog core.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A provider or tracker call failed (network, auth, parse).
    #[error("fetch failed for {source_id}: {message}")]
    Fetch { source_id: String, message: String },

    /// A provider returned data that contradicts itself.
    #[error("inconsistent data from {source_id}: {message}")]
    DataConsistency { source_id: String, message: String },

    /// No candidate, match, or selection was found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A target entity is missing a field it must carry.
    #[error("missing field `{field}` on {entity}")]
    MissingField { field: &'static str, entity: String },

    /// An item with the same global id is already tracked.
    #[error("{0} is already known")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    /// A runner task panicked or was cancelled before finishing.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl CatalogError {
    pub fn fetch(source_id: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetch { source_id: source_id.into(), message: message.to_string() }
    }

    pub fn inconsistent(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataConsistency { source_id: source_id.into(), message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Fatal errors indicate a bug and must abort a batch even when errors are ignored.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DataConsistency { .. } | Self::MissingField { .. })
    }
}

impl From<toml::de::Error> for CatalogError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
