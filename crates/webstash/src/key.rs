//! Full-key construction and prefix handling.
//!
//! A backend key is always `{namespace}:{logical_key}`. The namespace never
//! contains the separator, so the prefix of any backend key is the text before
//! its first `:`. Logical keys may contain further separators.

use crate::error::{Error, Result};

/// Separator between namespace and logical key.
pub const SEPARATOR: char = ':';

/// Check that a namespace can be used as a key prefix.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() || namespace.contains(SEPARATOR) {
        return Err(Error::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

/// Build the backend key for a logical key.
pub fn full_key(namespace: &str, logical: &str) -> String {
    format!("{namespace}{SEPARATOR}{logical}")
}

/// The prefix every key of `namespace` starts with, separator included.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}{SEPARATOR}")
}

/// Split a backend key into `(namespace, logical_key)`.
///
/// Returns `None` for keys with no separator; those belong to no namespace.
pub fn split(full: &str) -> Option<(&str, &str)> {
    full.split_once(SEPARATOR)
}

/// Strip `namespace:` from a backend key, if it is there.
pub fn strip<'a>(namespace: &str, full: &'a str) -> Option<&'a str> {
    full.strip_prefix(namespace)?.strip_prefix(SEPARATOR)
}
