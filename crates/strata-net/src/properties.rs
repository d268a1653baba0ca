//! Per-call layer configuration.
//!
//! Keys are namespaced as `<layer>.<name>` (for example `tls.trust_managers`).
//! A layer takes its own namespace out of a *copy* of the map and forwards the
//! rest untouched; keys it does not recognise are never dropped.
//!
//! Values are opaque (`Arc<dyn Any + Send + Sync>`) so layers can carry rich
//! objects such as certificate verifiers next to plain numbers and strings.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{NetError, Result};

/// An opaque property value.
pub type PropertyValue = Arc<dyn Any + Send + Sync>;

/// Mapping from namespaced keys to opaque values.
#[derive(Clone, Default)]
pub struct LayerProperties {
    entries: HashMap<String, PropertyValue>,
}

impl LayerProperties {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Insert an already shared value.
    pub fn insert_value(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.entries.insert(key.into(), value);
    }

    /// Typed lookup. Returns `None` if absent or of another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Raw lookup.
    pub fn get_value(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove and return `key`.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into `(own, forwarded)`: keys under `namespace.` go to `own`,
    /// everything else to `forwarded`. `self` is left untouched.
    pub fn split_namespace(&self, namespace: &str) -> (LayerProperties, LayerProperties) {
        let prefix = format!("{namespace}.");
        let mut own = LayerProperties::new();
        let mut forwarded = LayerProperties::new();
        for (key, value) in &self.entries {
            let target = if key.starts_with(&prefix) {
                &mut own
            } else {
                &mut forwarded
            };
            target.entries.insert(key.clone(), Arc::clone(value));
        }
        (own, forwarded)
    }

    /// Read a duration stored as milliseconds (`u64`, `u32`, `i64`, `usize`)
    /// or as a [`Duration`].
    ///
    /// A present key with any other type is a configuration error.
    pub fn get_millis(&self, key: &str) -> Result<Option<Duration>> {
        let Some(value) = self.entries.get(key) else {
            return Ok(None);
        };
        if let Some(d) = value.downcast_ref::<Duration>() {
            return Ok(Some(*d));
        }
        if let Some(ms) = value.downcast_ref::<u64>() {
            return Ok(Some(Duration::from_millis(*ms)));
        }
        if let Some(ms) = value.downcast_ref::<u32>() {
            return Ok(Some(Duration::from_millis(u64::from(*ms))));
        }
        if let Some(ms) = value.downcast_ref::<usize>() {
            return Ok(Some(Duration::from_millis(*ms as u64)));
        }
        if let Some(ms) = value.downcast_ref::<i64>() {
            let ms = u64::try_from(*ms)
                .map_err(|_| NetError::Connection(format!("negative timeout in {key}")))?;
            return Ok(Some(Duration::from_millis(ms)));
        }
        Err(NetError::Connection(format!(
            "property {key} must be a millisecond count"
        )))
    }

    /// Read a string value (`String` or `&'static str`).
    pub fn get_str(&self, key: &str) -> Option<&str> {
        let value = self.entries.get(key)?;
        if let Some(s) = value.downcast_ref::<String>() {
            return Some(s);
        }
        value.downcast_ref::<&'static str>().copied()
    }
}

impl fmt::Debug for LayerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("LayerProperties").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_get() {
        let props = LayerProperties::new()
            .with("tcpip.timeout_ms", 5000u64)
            .with("tls.enabled_cipher_suites", vec!["TLS13_AES_128_GCM_SHA256".to_string()]);
        assert_eq!(props.get::<u64>("tcpip.timeout_ms"), Some(&5000));
        assert_eq!(props.get::<u32>("tcpip.timeout_ms"), None);
        assert_eq!(
            props
                .get::<Vec<String>>("tls.enabled_cipher_suites")
                .map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn test_split_namespace_keeps_unknown_keys() {
        let props = LayerProperties::new()
            .with("tls.trust_managers", 1u8)
            .with("tls.enabled_cipher_suites", 2u8)
            .with("tcpip.timeout_ms", 3u64)
            .with("custom.thing", 4u8)
            .with("tlsish", 5u8);

        let (own, forwarded) = props.split_namespace("tls");
        assert_eq!(own.len(), 2);
        assert!(own.contains_key("tls.trust_managers"));
        assert_eq!(forwarded.len(), 3);
        assert!(forwarded.contains_key("tcpip.timeout_ms"));
        assert!(forwarded.contains_key("custom.thing"));
        assert!(forwarded.contains_key("tlsish"));
        assert!(!forwarded.keys().any(|k| k.starts_with("tls.")));

        // The caller's map is untouched.
        assert_eq!(props.len(), 5);
    }

    #[test]
    fn test_get_millis_forms() {
        let props = LayerProperties::new()
            .with("a", 1500u64)
            .with("b", 20u32)
            .with("c", Duration::from_secs(2))
            .with("d", -1i64)
            .with("e", "soon".to_string());
        assert_eq!(props.get_millis("a").expect("a"), Some(Duration::from_millis(1500)));
        assert_eq!(props.get_millis("b").expect("b"), Some(Duration::from_millis(20)));
        assert_eq!(props.get_millis("c").expect("c"), Some(Duration::from_secs(2)));
        assert!(props.get_millis("d").is_err());
        assert!(props.get_millis("e").is_err());
        assert_eq!(props.get_millis("missing").expect("missing"), None);
    }

    #[test]
    fn test_get_str() {
        let props = LayerProperties::new()
            .with("owned", "x".to_string())
            .with("static", "y");
        assert_eq!(props.get_str("owned"), Some("x"));
        assert_eq!(props.get_str("static"), Some("y"));
        assert_eq!(props.get_str("missing"), None);
    }

    #[test]
    fn test_debug_lists_keys_only() {
        let props = LayerProperties::new().with("b", 1u8).with("a", 2u8);
        assert_eq!(format!("{props:?}"), r#"LayerProperties { keys: ["a", "b"] }"#);
    }
}
