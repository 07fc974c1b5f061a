//! Storage backend contract and area identity.
//!
//! A backend models one Web Storage instance: a flat, synchronous,
//! string-keyed store. The store never assumes anything about a backend beyond
//! this trait; change notifications from other contexts arrive separately
//! through a [`ChangeFeed`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::DEFAULT_FEED_BUFFER;

/// Errors raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstrateError {
    /// A write would exceed the backend's storage quota.
    #[error("quota exceeded writing '{key}'")]
    QuotaExceeded { key: String },

    /// The backend cannot be accessed (e.g., disabled by the host).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// Identity of one storage area.
///
/// Two areas are never interchangeable, even if they hold the same keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(Uuid);

impl AreaId {
    /// Allocate a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AreaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of Web Storage an area models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaKind {
    /// Survives across sessions (`localStorage`).
    Durable,
    /// Scoped to a single page session (`sessionStorage`).
    Session,
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaKind::Durable => write!(f, "durable"),
            AreaKind::Session => write!(f, "session"),
        }
    }
}

/// A change made to an area from another execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed backend key; `None` signals a bulk clear.
    pub key: Option<String>,
    /// New raw value; `None` means the key was removed.
    pub new_value: Option<String>,
    /// Area the change happened in.
    pub area: AreaId,
}

impl StorageEvent {
    /// A key was set to a new raw value.
    pub fn set(area: AreaId, key: impl Into<String>, new_value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value: Some(new_value.into()),
            area,
        }
    }

    /// A key was removed.
    pub fn removed(area: AreaId, key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value: None,
            area,
        }
    }

    /// The whole area was cleared.
    pub fn cleared(area: AreaId) -> Self {
        Self {
            key: None,
            new_value: None,
            area,
        }
    }
}

/// Process-wide channel of [`StorageEvent`]s.
///
/// One feed may carry events for several areas; consumers filter by area.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StorageEvent>,
}

impl ChangeFeed {
    /// Create a feed buffering up to `capacity` undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of receivers it reached.
    pub fn publish(&self, event: StorageEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Start receiving events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_BUFFER)
    }
}

/// Contract for a Web Storage-like backend.
///
/// All calls are synchronous. Implementations must not call back into the
/// registry.
pub trait StorageBackend: Send + Sync {
    /// Identity of this area.
    fn area_id(&self) -> AreaId;

    /// Which kind of storage this area models.
    fn kind(&self) -> AreaKind;

    /// Read a raw value.
    fn get_item(&self, key: &str) -> Result<Option<String>, SubstrateError>;

    /// Write a raw value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), SubstrateError>;

    /// Delete a key. Deleting a missing key succeeds.
    fn remove_item(&self, key: &str) -> Result<(), SubstrateError>;

    /// Key at `index` in the backend's enumeration order.
    fn key(&self, index: usize) -> Result<Option<String>, SubstrateError>;

    /// Number of stored keys.
    fn length(&self) -> Result<usize, SubstrateError>;
}

/// Cheap, clonable handle to a storage backend.
///
/// Equality is area identity, not content.
#[derive(Clone)]
pub struct StorageArea {
    backend: Arc<dyn StorageBackend>,
}

impl StorageArea {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Wrap an owned backend.
    pub fn from_backend<B: StorageBackend + 'static>(backend: B) -> Self {
        Self::new(Arc::new(backend))
    }

    /// Identity of the wrapped area.
    pub fn id(&self) -> AreaId {
        self.backend.area_id()
    }

    /// Kind of the wrapped area.
    pub fn kind(&self) -> AreaKind {
        self.backend.kind()
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Every backend key, in enumeration order.
    pub fn all_keys(&self) -> Result<Vec<String>, SubstrateError> {
        let len = self.backend.length()?;
        let mut keys = Vec::with_capacity(len);
        for index in 0..len {
            if let Some(key) = self.backend.key(index)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

impl PartialEq for StorageArea {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for StorageArea {}

impl fmt::Debug for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageArea")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_ids_unique() {
        assert_ne!(AreaId::new(), AreaId::new());
    }

    #[test]
    fn test_feed_without_receivers() {
        let feed = ChangeFeed::new(4);
        assert_eq!(feed.publish(StorageEvent::cleared(AreaId::new())), 0);
    }

    #[test]
    fn test_feed_delivers_to_subscribers() {
        let feed = ChangeFeed::new(4);
        let mut rx = feed.subscribe();
        let area = AreaId::new();

        assert_eq!(feed.publish(StorageEvent::set(area, "app:k", "1")), 1);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.key.as_deref(), Some("app:k"));
        assert_eq!(event.new_value.as_deref(), Some("1"));
        assert_eq!(event.area, area);
    }

    #[test]
    fn test_event_constructors() {
        let area = AreaId::new();
        assert!(StorageEvent::removed(area, "k").new_value.is_none());
        assert!(StorageEvent::cleared(area).key.is_none());
    }
}
