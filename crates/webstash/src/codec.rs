//! JSON encoding and frozen decoding of stored values.
//!
//! Decoded values are handed out as [`FrozenValue`], an `Arc` around the
//! parsed tree. Holders can read but not mutate it; `Arc::make_mut` on a
//! clone copies first, so the cached tree never changes underneath anyone.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// An immutable, shareable decoded value.
pub type FrozenValue = Arc<Value>;

/// Convert a caller value into a JSON tree.
///
/// Fails for values JSON cannot represent, such as maps with non-string keys
/// or a bare `NaN`/infinite float. `None` becomes `Value::Null`. Non-finite
/// floats nested inside a larger value still become `null` fields.
pub fn to_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value> {
    let json = serde_json::to_value(value).map_err(|source| Error::Serialization {
        key: key.to_string(),
        source,
    })?;
    if json.is_null() && is_non_finite_float(value) {
        return Err(Error::Serialization {
            key: key.to_string(),
            source: serde::ser::Error::custom("non-finite float has no JSON form"),
        });
    }
    Ok(json)
}

// serde_json writes NaN and infinities as `null`; toml keeps them as floats.
fn is_non_finite_float<T: Serialize + ?Sized>(value: &T) -> bool {
    matches!(toml::Value::try_from(value), Ok(toml::Value::Float(f)) if !f.is_finite())
}

/// Encode a JSON tree to its stored string form.
pub fn encode(key: &str, value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|source| Error::Serialization {
        key: key.to_string(),
        source,
    })
}

/// Decode a stored string. Malformed input is an error.
///
/// A missing item and a stored `null` both decode to `None`: writing `null`
/// removes a key, so a persisted `null` is treated as absent.
pub fn decode(key: &str, raw: Option<&str>) -> Result<Option<FrozenValue>> {
    let decoded = raw.map(|raw| freeze(key, raw)).transpose()?;
    Ok(decoded.filter(|value| !value.is_null()))
}

/// Parse a stored string into a fresh frozen tree.
pub fn freeze(key: &str, raw: &str) -> Result<FrozenValue> {
    let value: Value = serde_json::from_str(raw).map_err(|source| Error::Decode {
        key: key.to_string(),
        source,
    })?;
    Ok(Arc::new(value))
}

/// Deserialize a decoded value into a caller type.
pub fn decode_as<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|source| Error::TypeMismatch {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_decode_none() {
        assert!(decode("k", None).unwrap().is_none());
    }

    #[test]
    fn test_decode_stored_null_is_absent() {
        assert!(decode("k", Some("null")).unwrap().is_none());
        assert!(decode("k", Some(" null ")).unwrap().is_none());
        assert_eq!(*decode("k", Some("[null]")).unwrap().unwrap(), json!([null]));
    }

    #[test]
    fn test_decode_nested() {
        let value = decode("k", Some(r#"{"a":[1,{"b":true}]}"#)).unwrap().unwrap();
        assert_eq!(*value, json!({"a": [1, {"b": true}]}));
    }

    #[test]
    fn test_decode_malformed_is_error() {
        let result = decode("app:k", Some("{not json"));
        match result {
            Err(Error::Decode { key, .. }) => assert_eq!(key, "app:k"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_decoded_copy_is_independent() {
        let frozen = decode("k", Some(r#"{"name":"Alice"}"#)).unwrap().unwrap();
        let mut copy = Arc::clone(&frozen);
        Arc::make_mut(&mut copy)["name"] = json!("Bob");

        assert_eq!(frozen["name"], "Alice");
        assert_eq!(copy["name"], "Bob");
    }

    #[test]
    fn test_non_string_map_keys_fail() {
        let mut map = BTreeMap::new();
        map.insert((1u8, 2u8), "pair");
        let result = to_json("k", &map);
        assert!(matches!(result, Err(Error::Serialization { .. })));
    }

    #[test]
    fn test_none_is_null() {
        let value = to_json("k", &Option::<u32>::None).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_non_finite_float_fails() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = to_json("app:k", &value);
            match result {
                Err(Error::Serialization { key, .. }) => assert_eq!(key, "app:k"),
                other => panic!("expected serialization error, got {other:?}"),
            }
        }
        assert!(matches!(
            to_json("k", &Some(f32::NAN)),
            Err(Error::Serialization { .. })
        ));
        assert_eq!(to_json("k", &1.5f64).unwrap(), json!(1.5));
    }

    #[test]
    fn test_decode_as_mismatch() {
        let value = json!("not a number");
        let result = decode_as::<u64>("k", &value);
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }
}
