//! Document model shared by the local store and the sync layer.
//!
//! A [`Document`] is an ordered map of named sections to nested [`Value`]s.
//! It is plain JSON with one addition: [`Value::Timestamp`], an explicitly
//! tagged server-assigned instant. On the wire a timestamp is the object
//! `{"$serverTimestamp": <millis>}`, so the local store can persist it as
//! ordinary JSON.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A state document: section name to value. Keys iterate in sorted order.
pub type Document = BTreeMap<String, Value>;

/// A server-assigned write time in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timestamp {
    #[serde(rename = "$serverTimestamp")]
    millis: i64,
}

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// The current wall-clock instant.
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.millis).single()
    }
}

/// A JSON value, or a tagged server timestamp.
///
/// Variant order matters for deserialization: a map with the single key
/// `$serverTimestamp` becomes a [`Timestamp`], every other map an object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Timestamp(Timestamp),
    Object(Document),
}

impl Value {
    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True for values that carry no user data: null, `""`, `[]`, or a map
    /// whose values are all blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.values().all(Value::is_blank),
            Value::Bool(_) | Value::Number(_) | Value::Timestamp(_) => false,
        }
    }

    /// Convert to plain JSON. Timestamps become their tagged object form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Timestamp(ts) => serde_json::json!({ "$serverTimestamp": ts.millis() }),
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(millis) = map.get("$serverTimestamp").and_then(|v| v.as_i64()) {
                        return Value::Timestamp(Timestamp::from_millis(millis));
                    }
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(map: Document) -> Self {
        Value::Object(map)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts)
    }
}

/// Build a document from a JSON object. Anything else yields an empty document.
pub fn document_from_json(value: serde_json::Value) -> Document {
    match Value::from(value) {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Convert a document to a plain JSON object.
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    serde_json::Value::Object(doc.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Recursively merge `patch` into `base`.
///
/// Maps merge key by key, last write wins per leaf. Arrays and scalars in
/// the patch replace whatever was there.
pub fn deep_merge(base: &mut Document, patch: Document) {
    for (key, incoming) in patch {
        match (base.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => deep_merge(existing, nested),
            (_, incoming) => {
                base.insert(key, incoming);
            }
        }
    }
}

/// Whether a document holds anything worth migrating: at least one top-level
/// section that is a non-blank list or map.
pub fn has_meaningful_data(doc: &Document) -> bool {
    doc.values()
        .any(|v| matches!(v, Value::Array(_) | Value::Object(_)) && !v.is_blank())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_preserves_unrelated_keys() {
        let mut base = document_from_json(json!({"a": 1, "nested": {"x": 1, "y": 2}}));
        deep_merge(
            &mut base,
            document_from_json(json!({"b": 2, "nested": {"y": 3}})),
        );

        assert_eq!(
            base,
            document_from_json(json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 3}}))
        );
    }

    #[test]
    fn test_deep_merge_replaces_arrays() {
        let mut base = document_from_json(json!({"upcomingItems": [1, 2, 3]}));
        deep_merge(&mut base, document_from_json(json!({"upcomingItems": [4]})));

        assert_eq!(base, document_from_json(json!({"upcomingItems": [4]})));
    }

    #[test]
    fn test_deep_merge_object_over_scalar() {
        let mut base = document_from_json(json!({"nextTrip": "none"}));
        deep_merge(
            &mut base,
            document_from_json(json!({"nextTrip": {"title": "Leeds"}})),
        );

        assert_eq!(
            base["nextTrip"].as_object().and_then(|m| m.get("title")),
            Some(&Value::from("Leeds"))
        );
    }

    #[test]
    fn test_timestamp_roundtrip_through_json() {
        let mut doc = Document::new();
        doc.insert("updatedAt".into(), Timestamp::from_millis(1_700_000_000_000).into());
        doc.insert("tasks".into(), Value::Array(vec!["x".into()]));

        let text = serde_json::to_string(&doc).unwrap();
        assert!(text.contains("\"$serverTimestamp\":1700000000000"));

        let back: Document = serde_json::from_str(&text).unwrap();
        assert_eq!(back, doc);
        assert!(matches!(back["updatedAt"], Value::Timestamp(_)));
    }

    #[test]
    fn test_timestamp_tag_requires_exact_shape() {
        let doc: Document =
            serde_json::from_str(r#"{"t": {"$serverTimestamp": 5, "other": 1}}"#).unwrap();
        assert!(matches!(doc["t"], Value::Object(_)));

        let converted = document_from_json(json!({"t": {"$serverTimestamp": 5}}));
        assert_eq!(converted["t"], Value::Timestamp(Timestamp::from_millis(5)));
    }

    #[test]
    fn test_blank_values() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("").is_blank());
        assert!(Value::from(document_from_json(json!({"green": "", "red": ""}))).is_blank());
        assert!(!Value::from(false).is_blank());
        assert!(!Value::Array(vec![Value::from("")]).is_blank());
    }

    #[test]
    fn test_has_meaningful_data() {
        assert!(!has_meaningful_data(&Document::new()));
        assert!(!has_meaningful_data(&document_from_json(json!({
            "tasksByDate": {},
            "upcomingItems": [],
            "supportPlanByStatus": {"green": "", "amber": "", "red": ""},
            "showWeeklyChecklist": true
        }))));
        assert!(has_meaningful_data(&document_from_json(json!({"tasks": ["x"]}))));
        assert!(has_meaningful_data(&document_from_json(json!({
            "weeklyByWeekKey": {"2024-W10": {"focus": "rest"}}
        }))));
    }

    #[test]
    fn test_non_object_json_yields_empty_document() {
        assert!(document_from_json(json!([1, 2])).is_empty());
        assert!(document_from_json(json!("text")).is_empty());
    }
}
