//! Error types for store operations.

use crate::substrate::SubstrateError;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The value handed to `set` has no JSON representation.
    #[error("failed to serialize value for '{key}': {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },

    /// Persisted content is not valid JSON.
    #[error("malformed stored value at '{key}': {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    /// Stored JSON does not match the type requested by a typed read.
    #[error("stored value at '{key}' does not match the requested type: {source}")]
    TypeMismatch {
        key: String,
        source: serde_json::Error,
    },

    /// Error raised by the storage backend itself.
    #[error("storage backend error: {0}")]
    Substrate(#[from] SubstrateError),

    /// Namespace is empty or contains the key separator.
    #[error("invalid namespace '{0}': must be non-empty and must not contain ':'")]
    InvalidNamespace(String),

    /// Failed to parse configuration.
    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
