//! Change notifications: cache changes out, storage events in.
//!
//! Each namespace broadcasts a [`CacheChange`] whenever its cached contents
//! change. A [`ChangeListener`] feeds external [`StorageEvent`]s for one area
//! into the registry.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::codec::FrozenValue;
use crate::error::Result;
use crate::registry::Registry;
use crate::substrate::{ChangeFeed, StorageArea, StorageEvent};

/// Where a cache change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A write through a store handle in this process.
    Local,
    /// A change notification from another context.
    External,
    /// A value pulled from the backend to fill a cache gap.
    Repair,
}

/// A change to one namespace's cached contents. Keys are logical keys.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheChange {
    /// A key now holds `value`.
    Updated {
        key: String,
        value: FrozenValue,
        origin: ChangeOrigin,
    },
    /// A key is no longer present.
    Removed { key: String, origin: ChangeOrigin },
    /// The whole namespace was emptied or replaced; re-read everything.
    Reset,
}

impl CacheChange {
    /// Logical key affected, or `None` for a reset.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheChange::Updated { key, .. } | CacheChange::Removed { key, .. } => Some(key),
            CacheChange::Reset => None,
        }
    }

    /// Whether this change can affect `key`.
    pub fn affects(&self, key: &str) -> bool {
        self.key().is_none_or(|k| k == key)
    }
}

/// Observes changes to a single logical key.
///
/// Resets always match. A watcher that falls behind the channel reports a
/// `Reset`, since it can no longer say which keys changed.
#[derive(Debug)]
pub struct KeyWatcher {
    key: String,
    rx: broadcast::Receiver<CacheChange>,
}

impl KeyWatcher {
    pub(crate) fn new(key: String, rx: broadcast::Receiver<CacheChange>) -> Self {
        Self { key, rx }
    }

    /// The watched logical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next pending change for this key, without waiting.
    pub fn try_next(&mut self) -> Option<CacheChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.affects(&self.key) => return Some(change),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(missed)) => {
                    debug!(key = %self.key, missed, "Key watcher lagged");
                    return Some(CacheChange::Reset);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next change to this key. Returns `None` once the
    /// namespace's channel is gone.
    pub async fn changed(&mut self) -> Option<CacheChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.affects(&self.key) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    debug!(key = %self.key, missed, "Key watcher lagged");
                    return Some(CacheChange::Reset);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Applies external storage events for one area to a registry.
pub struct ChangeListener {
    registry: Registry,
    area: StorageArea,
    rx: broadcast::Receiver<StorageEvent>,
}

impl ChangeListener {
    /// Bind an existing receiver to `area`.
    pub fn new(
        registry: Registry,
        area: StorageArea,
        rx: broadcast::Receiver<StorageEvent>,
    ) -> Self {
        Self { registry, area, rx }
    }

    /// Subscribe to `feed` on behalf of `area`.
    pub fn attach(registry: &Registry, area: &StorageArea, feed: &ChangeFeed) -> Self {
        Self::new(registry.clone(), area.clone(), feed.subscribe())
    }

    /// The area this listener applies events for.
    pub fn area(&self) -> &StorageArea {
        &self.area
    }

    /// Apply every pending event without waiting. Returns how many events
    /// touched a registered namespace.
    ///
    /// If events were dropped because the feed overflowed, the whole area is
    /// rescanned from the backend.
    pub fn pump(&mut self) -> Result<usize> {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.registry.apply_external(&self.area, &event) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Lagged(missed)) => self.recover(missed)?,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(applied),
            }
        }
    }

    /// Apply events as they arrive until the feed closes.
    pub async fn run(mut self) {
        debug!(area = %self.area.id(), "Change listener started");
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.registry.apply_external(&self.area, &event);
                }
                Err(RecvError::Lagged(missed)) => {
                    if let Err(e) = self.recover(missed) {
                        warn!(area = %self.area.id(), error = %e, "Resync after lag failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(area = %self.area.id(), "Change feed closed, listener stopped");
    }

    fn recover(&self, missed: u64) -> Result<()> {
        warn!(
            area = %self.area.id(),
            missed,
            "Change feed lagged, resynchronizing area"
        );
        self.registry.resync(&self.area)?;
        Ok(())
    }
}

impl std::fmt::Debug for ChangeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeListener")
            .field("area", &self.area)
            .finish_non_exhaustive()
    }
}
