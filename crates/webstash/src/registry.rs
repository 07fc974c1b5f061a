//! Shared cache registry.
//!
//! The registry owns one [`RegistryEntry`] per `(area, namespace)` pair. Every
//! [`StoreHandle`] opened for the same pair resolves to the same entry, so all
//! handles observe each other's writes without any notification round-trip.
//!
//! An entry is created the first time its pair is opened. Creation scans the
//! backend for keys under the namespace and decodes them; later opens are
//! plain lookups and never discard cached state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::codec::{self, FrozenValue};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::events::{CacheChange, ChangeOrigin};
use crate::handle::StoreHandle;
use crate::key;
use crate::substrate::{AreaId, StorageArea, StorageEvent};

/// Cached contents of one `(area, namespace)` pair.
///
/// The key set of `entries` is the set of managed backend keys; there is no
/// separate set to drift out of sync.
pub(crate) struct RegistryEntry {
    area: AreaId,
    namespace: String,
    entries: RwLock<BTreeMap<String, FrozenValue>>,
    changes: broadcast::Sender<CacheChange>,
}

impl RegistryEntry {
    fn new(
        area: AreaId,
        namespace: String,
        entries: BTreeMap<String, FrozenValue>,
        capacity: usize,
    ) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            area,
            namespace,
            entries: RwLock::new(entries),
            changes,
        }
    }

    pub(crate) fn get(&self, full: &str) -> Option<FrozenValue> {
        self.entries.read().get(full).cloned()
    }

    pub(crate) fn contains(&self, full: &str) -> bool {
        self.entries.read().contains_key(full)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn full_keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub(crate) fn logical_keys(&self) -> Vec<String> {
        self.entries
            .read()
            .keys()
            .map(|full| self.logical(full).to_string())
            .collect()
    }

    pub(crate) fn logical_key_at(&self, index: usize) -> Option<String> {
        self.entries
            .read()
            .keys()
            .nth(index)
            .map(|full| self.logical(full).to_string())
    }

    pub(crate) fn insert(&self, full: String, value: FrozenValue, origin: ChangeOrigin) {
        let mut entries = self.entries.write();
        let change = CacheChange::Updated {
            key: self.logical(&full).to_string(),
            value: Arc::clone(&value),
            origin,
        };
        entries.insert(full, value);
        self.notify(change);
    }

    /// Fill a cache gap. If another writer got there first, its value wins.
    pub(crate) fn repair(&self, full: String, value: FrozenValue) -> FrozenValue {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&full) {
            return Arc::clone(existing);
        }
        self.notify(CacheChange::Updated {
            key: self.logical(&full).to_string(),
            value: Arc::clone(&value),
            origin: ChangeOrigin::Repair,
        });
        entries.insert(full, Arc::clone(&value));
        value
    }

    /// Drop a key. Returns whether it was cached.
    pub(crate) fn remove(&self, full: &str, origin: ChangeOrigin) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.remove(full).is_some();
        if removed {
            self.notify(CacheChange::Removed {
                key: self.logical(full).to_string(),
                origin,
            });
        }
        removed
    }

    pub(crate) fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.notify(CacheChange::Reset);
    }

    fn replace_all(&self, fresh: BTreeMap<String, FrozenValue>) {
        let mut entries = self.entries.write();
        *entries = fresh;
        self.notify(CacheChange::Reset);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    fn logical<'a>(&self, full: &'a str) -> &'a str {
        key::strip(&self.namespace, full).unwrap_or(full)
    }

    fn notify(&self, change: CacheChange) {
        // No subscribers is not an error.
        let _ = self.changes.send(change);
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("area", &self.area)
            .field("namespace", &self.namespace)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

type EntryKey = (AreaId, String);

struct RegistryInner {
    config: StoreConfig,
    entries: Mutex<HashMap<EntryKey, Arc<RegistryEntry>>>,
}

/// Owner of every shared namespace cache.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry with the given configuration.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    /// Create a registry with default configuration.
    pub fn with_defaults() -> Self {
        Self::from_valid(StoreConfig::default())
    }

    fn from_valid(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide registry, created with default configuration.
    pub fn global() -> Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::with_defaults).clone()
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Open a handle on `namespace` within `area`.
    ///
    /// The first open of a pair registers it and loads every existing backend
    /// key under the namespace. A malformed stored value fails the open and
    /// leaves the pair unregistered.
    pub fn open(&self, area: &StorageArea, namespace: &str) -> Result<StoreHandle> {
        key::validate_namespace(namespace)?;
        let entry = self.resolve(area, namespace)?;
        Ok(StoreHandle::new(self.clone(), area.clone(), entry))
    }

    /// Open a handle on the configured default namespace.
    pub fn open_default(&self, area: &StorageArea) -> Result<StoreHandle> {
        let namespace = self.inner.config.default_namespace.clone();
        self.open(area, &namespace)
    }

    /// Whether a pair has been opened.
    pub fn is_registered(&self, area: &StorageArea, namespace: &str) -> bool {
        self.lookup(area.id(), namespace).is_some()
    }

    /// Namespaces registered for `area`, sorted.
    pub fn namespaces(&self, area: &StorageArea) -> Vec<String> {
        let id = area.id();
        let mut namespaces: Vec<String> = self
            .inner
            .entries
            .lock()
            .keys()
            .filter(|(entry_area, _)| *entry_area == id)
            .map(|(_, namespace)| namespace.clone())
            .collect();
        namespaces.sort();
        namespaces
    }

    /// Apply a change notification from another context.
    ///
    /// Events for other areas, bulk-clear events (no key), and keys whose
    /// namespace nobody opened are ignored. The namespace is taken from the
    /// event key, not from any particular handle. Returns whether a cache was
    /// touched.
    pub fn apply_external(&self, area: &StorageArea, event: &StorageEvent) -> bool {
        if event.area != area.id() {
            trace!(area = %area.id(), origin = %event.area, "Ignoring event from another area");
            return false;
        }
        let Some(full) = event.key.as_deref() else {
            trace!(area = %area.id(), "Ignoring bulk-clear event");
            return false;
        };
        let Some((namespace, _)) = key::split(full) else {
            return false;
        };
        let Some(entry) = self.lookup(event.area, namespace) else {
            trace!(key = %full, "No cache registered for event namespace");
            return false;
        };

        match codec::decode(full, event.new_value.as_deref()) {
            Ok(Some(value)) => {
                debug!(key = %full, "Applying external update");
                entry.insert(full.to_string(), value, ChangeOrigin::External);
            }
            Ok(None) => {
                debug!(key = %full, "Applying external removal");
                entry.remove(full, ChangeOrigin::External);
            }
            Err(e) => {
                // Nobody to report to here; the next get() surfaces the error.
                warn!(key = %full, error = %e, "Malformed external value, dropping cached copy");
                entry.remove(full, ChangeOrigin::External);
            }
        }
        true
    }

    /// Reload every namespace registered for `area` from the backend.
    ///
    /// Returns the total number of keys now cached for the area.
    pub fn resync(&self, area: &StorageArea) -> Result<usize> {
        let id = area.id();
        let entries: Vec<Arc<RegistryEntry>> = self
            .inner
            .entries
            .lock()
            .iter()
            .filter(|((entry_area, _), _)| *entry_area == id)
            .map(|(_, entry)| Arc::clone(entry))
            .collect();

        let mut total = 0;
        for entry in entries {
            let fresh = scan(area, entry.namespace())?;
            total += fresh.len();
            entry.replace_all(fresh);
        }
        debug!(area = %id, keys = total, "Resynchronized area");
        Ok(total)
    }

    /// Empty every registered cache without touching any backend.
    ///
    /// Entries stay registered, so existing handles keep sharing them.
    pub fn reset(&self) {
        let entries: Vec<Arc<RegistryEntry>> =
            self.inner.entries.lock().values().cloned().collect();
        for entry in &entries {
            entry.clear();
        }
        debug!(entries = entries.len(), "Registry caches reset");
    }

    fn lookup(&self, area: AreaId, namespace: &str) -> Option<Arc<RegistryEntry>> {
        self.inner
            .entries
            .lock()
            .get(&(area, namespace.to_string()))
            .cloned()
    }

    fn resolve(&self, area: &StorageArea, namespace: &str) -> Result<Arc<RegistryEntry>> {
        let id = area.id();
        // Held across the scan so concurrent first opens register one entry.
        let mut registered = self.inner.entries.lock();
        if let Some(entry) = registered.get(&(id, namespace.to_string())) {
            trace!(area = %id, namespace, "Reusing registered cache");
            return Ok(Arc::clone(entry));
        }

        let loaded = scan(area, namespace)?;
        debug!(
            area = %id,
            kind = %area.kind(),
            namespace,
            keys = loaded.len(),
            "Registered namespace cache"
        );
        let entry = Arc::new(RegistryEntry::new(
            id,
            namespace.to_string(),
            loaded,
            self.inner.config.change_capacity(),
        ));
        registered.insert((id, namespace.to_string()), Arc::clone(&entry));
        Ok(entry)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}

/// Load every backend key under `namespace`.
fn scan(area: &StorageArea, namespace: &str) -> Result<BTreeMap<String, FrozenValue>> {
    let prefix = key::namespace_prefix(namespace);
    let backend = area.backend();
    let mut loaded = BTreeMap::new();

    for full in area.all_keys()? {
        if !full.starts_with(&prefix) {
            continue;
        }
        if let Some(value) = codec::decode(&full, backend.get_item(&full)?.as_deref())? {
            loaded.insert(full, value);
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::MemoryStorage;
    use crate::substrate::StorageBackend;
    use serde_json::json;

    fn memory_area() -> (Arc<MemoryStorage>, StorageArea) {
        let storage = Arc::new(MemoryStorage::durable());
        let area = storage.area();
        (storage, area)
    }

    #[test]
    fn test_open_reuses_entry() {
        let (_storage, area) = memory_area();
        let registry = Registry::with_defaults();

        let h1 = registry.open(&area, "app").unwrap();
        h1.set("x", "a").unwrap();
        let h2 = registry.open(&area, "app").unwrap();

        assert!(h1.same_cache(&h2));
        assert_eq!(h2.len(), 1);
    }

    #[test]
    fn test_open_scans_only_matching_prefix() {
        let (storage, area) = memory_area();
        storage.set_item("app:a", "1").unwrap();
        storage.set_item("apple:b", "2").unwrap();
        storage.set_item("plain", "3").unwrap();

        let registry = Registry::with_defaults();
        let handle = registry.open(&area, "app").unwrap();

        assert_eq!(handle.keys(), vec!["a"]);
    }

    #[test]
    fn test_open_skips_stored_null() {
        let (storage, area) = memory_area();
        storage.set_item("app:empty", "null").unwrap();
        storage.set_item("app:full", "1").unwrap();

        let handle = Registry::with_defaults().open(&area, "app").unwrap();

        assert_eq!(handle.keys(), vec!["full"]);
        assert!(handle.get("empty").unwrap().is_none());
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn test_open_malformed_leaves_unregistered() {
        let (storage, area) = memory_area();
        storage.set_item("app:bad", "{oops").unwrap();

        let registry = Registry::with_defaults();
        let result = registry.open(&area, "app");
        assert!(matches!(result, Err(Error::Decode { .. })));
        assert!(!registry.is_registered(&area, "app"));

        storage.remove_item("app:bad").unwrap();
        assert!(registry.open(&area, "app").is_ok());
    }

    #[test]
    fn test_open_rejects_invalid_namespace() {
        let (_storage, area) = memory_area();
        let registry = Registry::with_defaults();
        assert!(matches!(
            registry.open(&area, "a:b"),
            Err(Error::InvalidNamespace(_))
        ));
        assert!(matches!(
            registry.open(&area, ""),
            Err(Error::InvalidNamespace(_))
        ));
    }

    #[test]
    fn test_open_default_uses_config() {
        let (_storage, area) = memory_area();
        let registry =
            Registry::new(StoreConfig::new().with_default_namespace("prefs")).unwrap();
        let handle = registry.open_default(&area).unwrap();
        assert_eq!(handle.namespace(), "prefs");
    }

    #[test]
    fn test_new_rejects_invalid_default_namespace() {
        let result = Registry::new(StoreConfig::new().with_default_namespace("x:y"));
        assert!(matches!(result, Err(Error::InvalidNamespace(_))));
    }

    #[test]
    fn test_namespaces_per_area() {
        let (_s1, area1) = memory_area();
        let (_s2, area2) = memory_area();
        let registry = Registry::with_defaults();

        registry.open(&area1, "b").unwrap();
        registry.open(&area1, "a").unwrap();
        registry.open(&area2, "c").unwrap();

        assert_eq!(registry.namespaces(&area1), vec!["a", "b"]);
        assert_eq!(registry.namespaces(&area2), vec!["c"]);
    }

    #[test]
    fn test_apply_external_ignores_foreign_area() {
        let (_s1, area1) = memory_area();
        let (_s2, area2) = memory_area();
        let registry = Registry::with_defaults();
        let handle = registry.open(&area1, "app").unwrap();

        let event = StorageEvent::set(area2.id(), "app:k", "1");
        assert!(!registry.apply_external(&area1, &event));
        assert!(!registry.apply_external(&area2, &event));
        assert!(handle.is_empty());
    }

    #[test]
    fn test_apply_external_ignores_bulk_clear_and_unprefixed() {
        let (_storage, area) = memory_area();
        let registry = Registry::with_defaults();
        let handle = registry.open(&area, "app").unwrap();
        handle.set("k", &1).unwrap();

        assert!(!registry.apply_external(&area, &StorageEvent::cleared(area.id())));
        assert!(!registry.apply_external(&area, &StorageEvent::set(area.id(), "k", "2")));
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn test_apply_external_malformed_drops_key() {
        let (storage, area) = memory_area();
        let registry = Registry::with_defaults();
        let handle = registry.open(&area, "app").unwrap();
        handle.set("k", &1).unwrap();

        storage.set_item("app:k", "{broken").unwrap();
        let event = StorageEvent::set(area.id(), "app:k", "{broken");
        assert!(registry.apply_external(&area, &event));

        assert_eq!(handle.len(), 0);
        assert!(matches!(handle.get("k"), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_apply_external_null_removes_key() {
        let (storage, area) = memory_area();
        let registry = Registry::with_defaults();
        let handle = registry.open(&area, "app").unwrap();
        handle.set("k", &1).unwrap();

        storage.set_item("app:k", "null").unwrap();
        storage.set_item("app:fresh", "null").unwrap();
        assert!(registry.apply_external(&area, &StorageEvent::set(area.id(), "app:k", "null")));
        assert!(registry.apply_external(&area, &StorageEvent::set(area.id(), "app:fresh", "null")));

        assert!(handle.is_empty());
        assert!(handle.get("k").unwrap().is_none());
        assert!(handle.get("fresh").unwrap().is_none());
    }

    #[test]
    fn test_resync_replaces_contents() {
        let (storage, area) = memory_area();
        let registry = Registry::with_defaults();
        let handle = registry.open(&area, "app").unwrap();
        handle.set("stale", &true).unwrap();

        storage.remove_item("app:stale").unwrap();
        storage.set_item("app:fresh", "\"yes\"").unwrap();

        assert_eq!(registry.resync(&area).unwrap(), 1);
        assert_eq!(handle.keys(), vec!["fresh"]);
    }

    #[test]
    fn test_reset_keeps_entries_registered() {
        let (_storage, area) = memory_area();
        let registry = Registry::with_defaults();
        let handle = registry.open(&area, "app").unwrap();
        handle.set("k", &json!({"a": 1})).unwrap();

        registry.reset();

        assert!(registry.is_registered(&area, "app"));
        assert_eq!(handle.len(), 0);
        // Backend untouched, so reads repair.
        assert_eq!(*handle.get("k").unwrap().unwrap(), json!({"a": 1}));
        assert_eq!(handle.len(), 1);
    }
}
