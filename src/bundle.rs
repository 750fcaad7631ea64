use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Map of named bundles, keyed by `"gatewayId/subkey"`. This is the unit of
/// exchange with a [`PersistentStorage`](crate::storage::PersistentStorage).
pub type BundleMap = HashMap<String, Bundle>;

/// A single typed value stored in a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BundleValue {
    Str(String),
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    /// Arbitrary serializable state, kept as a JSON tree.
    Opaque(serde_json::Value),
}

/// A mapping from string keys to typed values, used for state snapshots.
///
/// The typed getters are forgiving: they return the supplied default when
/// the key is absent or the stored kind differs. Not safe for concurrent
/// mutation; bundles are only touched on the dispatch thread or before
/// launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    values: HashMap<String, BundleValue>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// A snapshot of the keys currently present.
    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<&BundleValue> {
        self.values.get(key)
    }

    pub fn put_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), BundleValue::Str(value.into()));
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) {
        self.values.insert(key.into(), BundleValue::Bool(value));
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) {
        self.values.insert(key.into(), BundleValue::Int(value));
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.values.insert(key.into(), BundleValue::Long(value));
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), BundleValue::Double(value));
    }

    /// Stores an already-encoded JSON tree as an opaque value.
    pub fn put_opaque_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), BundleValue::Opaque(value));
    }

    /// Stores any serializable value as an opaque JSON tree.
    pub fn put_opaque<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<()> {
        let encoded = serde_json::to_value(value)?;
        self.values.insert(key.into(), BundleValue::Opaque(encoded));
        Ok(())
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(BundleValue::Str(v)) => v.clone(),
            _ => default.to_owned(),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(BundleValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.values.get(key) {
            Some(BundleValue::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(BundleValue::Long(v)) => *v,
            _ => default,
        }
    }

    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(BundleValue::Double(v)) => *v,
            _ => default,
        }
    }

    /// The raw JSON tree of an opaque value, if present.
    pub fn opaque(&self, key: &str) -> Option<&serde_json::Value> {
        match self.values.get(key) {
            Some(BundleValue::Opaque(v)) => Some(v),
            _ => None,
        }
    }

    /// Decodes an opaque value into `T`, or `None` on absence or mismatch.
    pub fn get_opaque<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.opaque(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
