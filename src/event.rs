//! Event data model (spec.md §3, design note §9: "dynamic typing of event
//! fields ... model as a tagged variant").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mandatory key holding the original, verbatim message text.
pub const RAW_FIELD: &str = "_raw";

/// A field value. Parsers and enrichment hooks only ever produce these five
/// shapes; nested structured data (e.g. `geo`, `asn`) is `Map`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Map(BTreeMap<String, Value>),
    Null,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// A loose string projection used by filter matching and redaction,
    /// never by serialization.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Map(_) => String::new(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A mutable field map guaranteed to carry `_raw`.
///
/// Size invariant (spec.md §3): `_raw` is preserved verbatim for audit, even
/// on parse failure — every mutator in this crate that touches `_raw` is
/// expected to uphold that and is covered by parser idempotence tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: BTreeMap<String, Value>,
}

impl Event {
    /// Build the initial event for an inbound message: `{_raw: msg}`.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(RAW_FIELD.to_string(), Value::String(raw.into()));
        Self { fields }
    }

    pub fn raw(&self) -> &str {
        match self.fields.get(RAW_FIELD) {
            Some(Value::String(s)) => s.as_str(),
            _ => "",
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        debug_assert_ne!(key, RAW_FIELD, "use Event::from_raw to set _raw, never overwrite it");
        self.fields.insert(key, value.into());
    }

    /// Unconditional field set, used internally only by the engine's
    /// `from_raw` constructor; exposed so adapters reconstructing from a
    /// previously-serialized event can round-trip `_raw` itself.
    pub fn set_raw_unchecked(&mut self, raw: impl Into<String>) {
        self.fields.insert(RAW_FIELD.to_string(), Value::String(raw.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if key == RAW_FIELD {
            return None;
        }
        self.fields.remove(key)
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if from == RAW_FIELD || to == RAW_FIELD {
            return;
        }
        if let Some(v) = self.fields.remove(from) {
            self.fields.insert(to.to_string(), v);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.fields.iter_mut()
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self.fields.get("_dropped"), Some(Value::Bool(true)))
    }

    pub fn mark_dropped(&mut self) {
        self.fields.insert("_dropped".to_string(), Value::Bool(true));
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.fields).unwrap_or(serde_json::Value::Null)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_sets_raw_field() {
        let e = Event::from_raw("hello world");
        assert_eq!(e.raw(), "hello world");
    }

    #[test]
    fn set_never_overwrites_raw_through_normal_path() {
        let mut e = Event::from_raw("original");
        e.set("field", "value");
        assert_eq!(e.raw(), "original");
        assert_eq!(e.get("field").and_then(Value::as_str), Some("value"));
    }

    #[test]
    fn rename_refuses_raw() {
        let mut e = Event::from_raw("original");
        e.rename(RAW_FIELD, "stolen");
        assert_eq!(e.raw(), "original");
        assert!(e.get("stolen").is_none());
    }
}
