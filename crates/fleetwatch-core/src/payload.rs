//! Schemaless payloads.
//!
//! Heartbeats and events carry arbitrary nested key/value data reported by the
//! agents. [`Payload`] wraps a JSON object and exposes accessors that return
//! `None` (or a caller-supplied default) for missing or mistyped fields instead
//! of failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object with lenient typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Create an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a payload from any JSON value.
    ///
    /// Non-object values are wrapped under the key `"value"` so that nothing
    /// reported by an agent is lost.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::default(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
        }
    }

    /// Insert a field, returning the payload for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw access to a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A numeric field. Numeric strings are accepted.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A numeric field, or `default` when absent or not numeric.
    #[must_use]
    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    /// An integer field.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A string field.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// A string field, or `default` when absent.
    #[must_use]
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    /// A boolean field.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// A nested object field.
    #[must_use]
    pub fn get_object(&self, key: &str) -> Option<Payload> {
        match self.0.get(key)? {
            Value::Object(map) => Some(Self(map.clone())),
            _ => None,
        }
    }

    /// Number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize to a compact JSON string for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parse a stored JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    /// Convert into the underlying JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_degrade_to_defaults() {
        let payload = Payload::new();
        assert_eq!(payload.get_f64("cpu"), None);
        assert!((payload.f64_or("cpu", 100.0) - 100.0).abs() < f64::EPSILON);
        assert_eq!(payload.str_or("status", "unknown"), "unknown");
    }

    #[test]
    fn mistyped_fields_are_not_errors() {
        let payload = Payload::from_value(json!({"cpu": {"nested": true}, "ok": "yes"}));
        assert_eq!(payload.get_f64("cpu"), None);
        assert_eq!(payload.get_bool("ok"), None);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let payload = Payload::new().with("latency", "1.5").with("count", " 3 ");
        assert_eq!(payload.get_f64("latency"), Some(1.5));
        assert_eq!(payload.get_i64("count"), Some(3));
    }

    #[test]
    fn non_object_values_are_wrapped() {
        let payload = Payload::from_value(json!(42));
        assert_eq!(payload.get_i64("value"), Some(42));
        assert!(Payload::from_value(Value::Null).is_empty());
    }

    #[test]
    fn nested_objects() {
        let payload = Payload::from_value(json!({"resources": {"memory": 61.5}}));
        let nested = payload.get_object("resources").unwrap();
        assert_eq!(nested.get_f64("memory"), Some(61.5));
    }

    #[test]
    fn json_text_roundtrip_preserves_fields() {
        let payload = Payload::new().with("status", "ok").with("tasks", 7);
        let text = payload.to_json().unwrap();
        let back = Payload::from_json(&text).unwrap();
        assert_eq!(back, payload);
    }
}
