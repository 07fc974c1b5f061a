//! Shared, observable JSON cache over Web Storage-style backends.
//!
//! This crate keeps an in-memory mirror of one namespace of a key-value
//! storage area and shares it between every handle opened on the same
//! `(area, namespace)` pair:
//! - Typed reads and writes of JSON values, persisted as `{namespace}:{key}`
//! - Frozen (`Arc`) values that callers cannot mutate in place
//! - Change subscriptions per namespace or per key
//! - External change notifications applied by a [`ChangeListener`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use webstash::{MemoryStorage, Registry};
//!
//! let storage = Arc::new(MemoryStorage::durable());
//! let registry = Registry::with_defaults();
//!
//! let prefs = registry.open(&storage.area(), "prefs")?;
//! prefs.set("theme", "dark")?;
//!
//! let again = registry.open(&storage.area(), "prefs")?;
//! assert_eq!(again.get_as::<String>("theme")?.as_deref(), Some("dark"));
//! ```

pub mod codec;
mod config;
mod error;
mod events;
mod handle;
pub mod key;
mod memory;
mod registry;
mod substrate;

pub use codec::FrozenValue;
pub use config::{DEFAULT_CHANGE_BUFFER, DEFAULT_FEED_BUFFER, DEFAULT_NAMESPACE, StoreConfig};
pub use error::{Error, Result};
pub use events::{CacheChange, ChangeListener, ChangeOrigin, KeyWatcher};
pub use handle::StoreHandle;
pub use memory::MemoryStorage;
pub use registry::Registry;
pub use substrate::{
    AreaId, AreaKind, ChangeFeed, StorageArea, StorageBackend, StorageEvent, SubstrateError,
};
