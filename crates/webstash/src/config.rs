//! Configuration for the store registry.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key;

/// Namespace used when a handle is opened without one.
///
/// Public so tests can build prefixed backend keys by hand.
pub const DEFAULT_NAMESPACE: &str = "webstash";

/// Default capacity of each namespace's change channel.
pub const DEFAULT_CHANGE_BUFFER: usize = 64;

/// Default capacity of a [`ChangeFeed`](crate::ChangeFeed).
pub const DEFAULT_FEED_BUFFER: usize = 256;

/// Configuration for a [`Registry`](crate::Registry).
///
/// Maps to a TOML table:
/// ```toml
/// default_namespace = "myapp"
/// change_buffer = 128
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Namespace used by `Registry::open_default`.
    pub default_namespace: String,

    /// Capacity of each namespace's change channel.
    /// Slow subscribers that fall further behind than this observe a lag.
    pub change_buffer: usize,

    /// Capacity used by `ChangeFeed::default()`.
    pub feed_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            change_buffer: DEFAULT_CHANGE_BUFFER,
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing fields take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the default namespace.
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Set the per-namespace change channel capacity.
    pub fn with_change_buffer(mut self, capacity: usize) -> Self {
        self.change_buffer = capacity;
        self
    }

    /// Set the default feed capacity.
    pub fn with_feed_buffer(mut self, capacity: usize) -> Self {
        self.feed_buffer = capacity;
        self
    }

    /// Check that the default namespace is usable.
    pub fn validate(&self) -> Result<()> {
        key::validate_namespace(&self.default_namespace)
    }

    /// Channel capacities must be non-zero for tokio's broadcast.
    pub(crate) fn change_capacity(&self) -> usize {
        self.change_buffer.max(1)
    }
}
