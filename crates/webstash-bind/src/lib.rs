//! Field-style bindings over webstash store handles.
//!
//! A [`Binding`] is a getter/setter pair for one logical key, with an
//! optional fallback returned while the key is absent. Bindings come from a
//! [`Binder`], which has two distinct entry points:
//! - [`Binder::bind`] binds to an explicit storage key
//! - [`Binder::bind_default`] binds to a key named after the field itself
//!
//! # Example
//!
//! ```rust,ignore
//! use webstash_bind::Binder;
//!
//! let binder = Binder::new(&area)?;
//! let theme = binder.bind_default::<String>("theme").with_default("light".into());
//!
//! assert_eq!(theme.get()?.as_deref(), Some("light"));
//! theme.set(&"dark".to_string())?;
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use webstash::{FrozenValue, Result, StorageArea, StoreHandle};

/// Factory for [`Binding`]s sharing one store handle.
#[derive(Debug, Clone)]
pub struct Binder {
    handle: StoreHandle,
}

impl Binder {
    /// Bind against the default namespace of `area` in the global registry.
    pub fn new(area: &StorageArea) -> Result<Self> {
        Ok(Self::with_handle(StoreHandle::open_default(area)?))
    }

    /// Bind against an existing handle.
    pub fn with_handle(handle: StoreHandle) -> Self {
        Self { handle }
    }

    /// The underlying handle.
    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }

    /// Bind to an explicit logical key.
    pub fn bind<T>(&self, key: impl Into<String>) -> Binding<T> {
        Binding::new(self.handle.clone(), key.into())
    }

    /// Bind to a key named after the field.
    ///
    /// Same as [`bind`](Self::bind); kept as its own entry point to mirror the
    /// bare, argument-less form where the key defaults to the field name.
    pub fn bind_default<T>(&self, field_name: &str) -> Binding<T> {
        Binding::new(self.handle.clone(), field_name.to_string())
    }

    /// Drop this binder's cached values without touching storage.
    pub fn clear_cache(&self) {
        self.handle.clear_cache();
    }

    /// Re-read one key from storage into the shared cache.
    pub fn initialize_key(&self, key: &str) -> Result<Option<FrozenValue>> {
        debug!(namespace = %self.handle.namespace(), key, "Initializing bound key");
        self.handle.reload(key)
    }
}

/// Getter/setter pair for one logical key.
#[derive(Debug, Clone)]
pub struct Binding<T> {
    handle: StoreHandle,
    key: String,
    default: Option<T>,
}

impl<T> Binding<T> {
    fn new(handle: StoreHandle, key: String) -> Self {
        Self {
            handle,
            key,
            default: None,
        }
    }

    /// Value returned by [`get`](Self::get) while the key is absent.
    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }

    /// The bound logical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove the stored value; later reads fall back to the default.
    pub fn remove(&self) -> Result<()> {
        self.handle.remove(&self.key)
    }
}

impl<T> Binding<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Stored value, or the default when nothing is stored.
    pub fn get(&self) -> Result<Option<T>> {
        match self.handle.get_as::<T>(&self.key)? {
            Some(value) => Ok(Some(value)),
            None => Ok(self.default.clone()),
        }
    }

    /// Store a value.
    pub fn set(&self, value: &T) -> Result<()> {
        self.handle.set(&self.key, value)
    }

    /// Store a value, or remove the key for `None`.
    pub fn set_opt(&self, value: Option<&T>) -> Result<()> {
        match value {
            Some(value) => self.set(value),
            None => self.remove(),
        }
    }
}
