//! Flat event records emitted downstream.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::values::DocValue;

/// A single-level record produced from one source document.
///
/// Values are scalars or arrays after a `flatten`/`dig` transform; a `raw`
/// transform may leave nested objects in place. Inserting an existing key
/// replaces the previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlatEvent {
    fields: BTreeMap<String, DocValue>,
}

impl FlatEvent {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<DocValue>) -> Option<DocValue> {
        self.fields.insert(key.into(), value.into())
    }

    /// Get a field value by name.
    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DocValue)> {
        self.fields.iter()
    }

    pub fn fields(&self) -> &BTreeMap<String, DocValue> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, DocValue> {
        self.fields
    }

    /// Render the event as one line of JSON.
    pub fn to_json_line(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl FromIterator<(String, DocValue)> for FlatEvent {
    fn from_iter<I: IntoIterator<Item = (String, DocValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let mut event = FlatEvent::new();
        assert!(event.insert("a", 1i64).is_none());
        assert_eq!(event.insert("a", "two"), Some(DocValue::Int(1)));
        assert_eq!(event.get("a"), Some(&DocValue::from("two")));
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn test_json_line_is_sorted_map() {
        let mut event = FlatEvent::new();
        event.insert("b", 2i64);
        event.insert("a", vec!["x", "y"]);
        assert_eq!(event.to_json_line().unwrap(), r#"{"a":["x","y"],"b":2}"#);
    }
}
