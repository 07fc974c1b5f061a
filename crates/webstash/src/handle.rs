//! Store handles: the per-caller view of a shared namespace cache.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::codec::{self, FrozenValue};
use crate::error::Result;
use crate::events::{CacheChange, ChangeOrigin, KeyWatcher};
use crate::key;
use crate::registry::{Registry, RegistryEntry};
use crate::substrate::{StorageArea, StorageEvent};

/// Handle to one namespace of one storage area.
///
/// Handles carry no state of their own; every handle for the same
/// `(area, namespace)` pair reads and writes the same registry entry.
/// Cloning is cheap.
///
/// Values come back as [`FrozenValue`]s. Mutating one requires
/// `Arc::make_mut`, which copies, so a write-back must go through
/// [`set`](Self::set).
#[derive(Clone)]
pub struct StoreHandle {
    registry: Registry,
    area: StorageArea,
    entry: Arc<RegistryEntry>,
}

impl StoreHandle {
    pub(crate) fn new(registry: Registry, area: StorageArea, entry: Arc<RegistryEntry>) -> Self {
        Self {
            registry,
            area,
            entry,
        }
    }

    /// Open a handle through the global registry.
    pub fn open(area: &StorageArea, namespace: &str) -> Result<Self> {
        Registry::global().open(area, namespace)
    }

    /// Open a handle on the default namespace through the global registry.
    pub fn open_default(area: &StorageArea) -> Result<Self> {
        Registry::global().open_default(area)
    }

    /// The namespace this handle is bound to.
    pub fn namespace(&self) -> &str {
        self.entry.namespace()
    }

    /// The storage area this handle is bound to.
    pub fn area(&self) -> &StorageArea {
        &self.area
    }

    /// The registry this handle was opened from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether two handles share one cache.
    pub fn same_cache(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Backend key for a logical key.
    pub fn full_key(&self, key: &str) -> String {
        key::full_key(self.namespace(), key)
    }

    /// Read a value.
    ///
    /// Cached values are returned directly. On a cache miss the backend is
    /// read once: if it has nothing (or a stored `null`), `None` comes back
    /// and the cache is left alone; otherwise the value is decoded, cached,
    /// and returned.
    pub fn get(&self, key: &str) -> Result<Option<FrozenValue>> {
        let full = self.full_key(key);
        if let Some(value) = self.entry.get(&full) {
            trace!(key = %full, "Cache hit");
            return Ok(Some(value));
        }

        let raw = self.area.backend().get_item(&full)?;
        let Some(value) = codec::decode(&full, raw.as_deref())? else {
            trace!(key = %full, "Cache miss, not in backend");
            return Ok(None);
        };
        debug!(key = %full, "Cache miss, repairing from backend");
        Ok(Some(self.entry.repair(full, value)))
    }

    /// Read a value as a concrete type.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => codec::decode_as(&self.full_key(key), &value).map(Some),
            None => Ok(None),
        }
    }

    /// Write a value.
    ///
    /// Values that serialize to `null` (including `None`) remove the key.
    /// A bare non-finite float is rejected with [`Error::Serialization`](crate::Error::Serialization)
    /// rather than treated as `null`.
    /// The backend is written before the cache, so a backend failure leaves
    /// the cache as it was. The cache keeps its own decoded copy; `value` is
    /// only borrowed.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let full = self.full_key(key);
        let json = codec::to_json(&full, value)?;
        if json.is_null() {
            return self.remove(key);
        }

        let raw = codec::encode(&full, &json)?;
        let frozen = codec::freeze(&full, &raw)?;
        self.area.backend().set_item(&full, &raw)?;
        trace!(key = %full, bytes = raw.len(), "Stored value");
        self.entry.insert(full, frozen, ChangeOrigin::Local);
        Ok(())
    }

    /// Remove a key. Removing a missing key is a no-op.
    pub fn remove(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.area.backend().remove_item(&full)?;
        if self.entry.remove(&full, ChangeOrigin::Local) {
            trace!(key = %full, "Removed value");
        }
        Ok(())
    }

    /// Remove every key this namespace manages, from backend and cache.
    ///
    /// Keys of other namespaces are never touched. If the backend fails
    /// partway, keys already removed are gone from both sides and the rest
    /// remain in both.
    pub fn clear(&self) -> Result<()> {
        let keys = self.entry.full_keys();
        for full in &keys {
            self.area.backend().remove_item(full)?;
            self.entry.remove(full, ChangeOrigin::Local);
        }
        debug!(namespace = %self.namespace(), removed = keys.len(), "Cleared namespace");
        Ok(())
    }

    /// Logical key at `index` in this namespace, ordered by key.
    pub fn key(&self, index: usize) -> Option<String> {
        self.entry.logical_key_at(index)
    }

    /// All logical keys in this namespace, ordered by key.
    pub fn keys(&self) -> Vec<String> {
        self.entry.logical_keys()
    }

    /// Number of managed keys.
    pub fn len(&self) -> usize {
        self.entry.len()
    }

    /// Whether no keys are managed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a key is currently cached (no backend read).
    pub fn contains_key(&self, key: &str) -> bool {
        self.entry.contains(&self.full_key(key))
    }

    /// Empty this namespace's cache without touching the backend.
    ///
    /// Subsequent reads repair from the backend.
    pub fn clear_cache(&self) {
        self.entry.clear();
        debug!(namespace = %self.namespace(), "Namespace cache cleared");
    }

    /// Re-read one key from the backend, caching or dropping it to match.
    pub fn reload(&self, key: &str) -> Result<Option<FrozenValue>> {
        let full = self.full_key(key);
        let raw = self.area.backend().get_item(&full)?;
        match codec::decode(&full, raw.as_deref())? {
            Some(value) => {
                self.entry
                    .insert(full, Arc::clone(&value), ChangeOrigin::Repair);
                Ok(Some(value))
            }
            None => {
                self.entry.remove(&full, ChangeOrigin::Repair);
                Ok(None)
            }
        }
    }

    /// Observe every change to this namespace.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.entry.subscribe()
    }

    /// Observe changes to one logical key.
    pub fn watch(&self, key: &str) -> KeyWatcher {
        KeyWatcher::new(key.to_string(), self.entry.subscribe())
    }

    /// Apply a change notification for this handle's area.
    ///
    /// The affected namespace comes from the event key, so this also updates
    /// namespaces other than this handle's.
    pub fn apply_external(&self, event: &StorageEvent) -> bool {
        self.registry.apply_external(&self.area, event)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("area", &self.area)
            .field("namespace", &self.namespace())
            .finish_non_exhaustive()
    }
}
