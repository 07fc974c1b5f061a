//! In-memory storage backend.
//!
//! Behaves like a Web Storage instance: writes through [`StorageBackend`]
//! are silent, while the `external_*` methods simulate another context
//! touching the same storage and publish a [`StorageEvent`] on the attached
//! feed.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::substrate::{
    AreaId, AreaKind, ChangeFeed, StorageArea, StorageBackend, StorageEvent, SubstrateError,
};

/// Ordered in-memory backend with an optional byte quota.
#[derive(Debug)]
pub struct MemoryStorage {
    id: AreaId,
    kind: AreaKind,
    items: RwLock<BTreeMap<String, String>>,
    /// Maximum total of key and value lengths, in bytes.
    quota: Option<usize>,
    feed: Option<ChangeFeed>,
}

impl MemoryStorage {
    /// Create an empty backend of the given kind with no feed.
    pub fn new(kind: AreaKind) -> Self {
        Self {
            id: AreaId::new(),
            kind,
            items: RwLock::new(BTreeMap::new()),
            quota: None,
            feed: None,
        }
    }

    /// Create an empty durable backend.
    pub fn durable() -> Self {
        Self::new(AreaKind::Durable)
    }

    /// Create an empty session backend.
    pub fn session() -> Self {
        Self::new(AreaKind::Session)
    }

    /// Publish external changes on `feed`.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Limit total stored bytes (keys plus values).
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Wrap a shared backend as a [`StorageArea`].
    pub fn area(self: &Arc<Self>) -> StorageArea {
        StorageArea::new(Arc::clone(self) as Arc<dyn StorageBackend>)
    }

    /// Bytes currently stored.
    pub fn used_bytes(&self) -> usize {
        self.items
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Snapshot of every stored pair.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.items.read().clone()
    }

    /// Set a key as another context would, and publish the change.
    pub fn external_set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        self.set_item(key, value)?;
        self.publish(StorageEvent::set(self.id, key, value));
        Ok(())
    }

    /// Remove a key as another context would, and publish the change.
    pub fn external_remove(&self, key: &str) {
        self.items.write().remove(key);
        self.publish(StorageEvent::removed(self.id, key));
    }

    /// Clear everything as another context would, and publish a bulk-clear event.
    pub fn external_clear(&self) {
        self.items.write().clear();
        self.publish(StorageEvent::cleared(self.id));
    }

    fn publish(&self, event: StorageEvent) {
        if let Some(feed) = &self.feed {
            let reached = feed.publish(event);
            trace!(area = %self.id, receivers = reached, "Published external change");
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn area_id(&self) -> AreaId {
        self.id
    }

    fn kind(&self) -> AreaKind {
        self.kind
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        let mut items = self.items.write();

        if let Some(quota) = self.quota {
            let used: usize = items.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = items.get(key).map_or(0, |old| key.len() + old.len());
            if used - replaced + key.len() + value.len() > quota {
                return Err(SubstrateError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), SubstrateError> {
        self.items.write().remove(key);
        Ok(())
    }

    fn key(&self, index: usize) -> Result<Option<String>, SubstrateError> {
        Ok(self.items.read().keys().nth(index).cloned())
    }

    fn length(&self) -> Result<usize, SubstrateError> {
        Ok(self.items.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_crud() {
        let storage = MemoryStorage::durable();
        storage.set_item("a", "1").unwrap();
        storage.set_item("b", "2").unwrap();

        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.length().unwrap(), 2);
        assert_eq!(storage.key(1).unwrap().as_deref(), Some("b"));
        assert_eq!(storage.key(2).unwrap(), None);

        storage.remove_item("a").unwrap();
        storage.remove_item("missing").unwrap();
        assert_eq!(storage.get_item("a").unwrap(), None);
        assert_eq!(storage.length().unwrap(), 1);
    }

    #[test]
    fn test_quota() {
        let storage = MemoryStorage::durable().with_quota(10);
        storage.set_item("k", "12345").unwrap();
        // Replacing counts only the difference.
        storage.set_item("k", "123456789").unwrap();

        let err = storage.set_item("x", "1").unwrap_err();
        assert_eq!(err, SubstrateError::QuotaExceeded { key: "x".into() });
        assert_eq!(storage.used_bytes(), 10);
    }

    #[test]
    fn test_local_writes_do_not_publish() {
        let feed = ChangeFeed::new(8);
        let mut rx = feed.subscribe();
        let storage = MemoryStorage::durable().with_feed(feed);

        storage.set_item("a", "1").unwrap();
        storage.remove_item("a").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_external_writes_publish() {
        let feed = ChangeFeed::new(8);
        let mut rx = feed.subscribe();
        let storage = MemoryStorage::session().with_feed(feed);

        storage.external_set("app:a", "1").unwrap();
        storage.external_remove("app:a");
        storage.external_clear();

        assert_eq!(
            rx.try_recv().unwrap(),
            StorageEvent::set(storage.area_id(), "app:a", "1")
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StorageEvent::removed(storage.area_id(), "app:a")
        );
        assert_eq!(rx.try_recv().unwrap(), StorageEvent::cleared(storage.area_id()));
    }

    #[test]
    fn test_area_identity() {
        let storage = Arc::new(MemoryStorage::durable());
        let a = storage.area();
        let b = storage.area();
        let other = Arc::new(MemoryStorage::durable()).area();

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(a.kind(), AreaKind::Durable);
    }
}
