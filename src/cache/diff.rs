//! Scalar diff calculation for cache merges and reconciliation passes.
//!
//! Only top-level scalar fields are compared; objects and arrays are left out
//! so that the activity feed announces simple state transitions only.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value};

/// One changed field: `[new, old]`, or `[new, old, elapsedMs]` for locations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Vec<Value>")]
pub struct FieldChange {
    pub new: Value,
    pub old: Value,
    /// Milliseconds spent at the previous value (location only)
    pub elapsed_ms: Option<i64>,
}

impl FieldChange {
    pub fn new(new: Value, old: Value) -> Self {
        Self {
            new,
            old,
            elapsed_ms: None,
        }
    }

    pub fn new_str(&self) -> &str {
        self.new.as_str().unwrap_or_default()
    }

    pub fn old_str(&self) -> &str {
        self.old.as_str().unwrap_or_default()
    }
}

impl Serialize for FieldChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.elapsed_ms.is_some() { 3 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.new)?;
        seq.serialize_element(&self.old)?;
        if let Some(ms) = self.elapsed_ms {
            seq.serialize_element(&ms)?;
        }
        seq.end()
    }
}

impl From<Vec<Value>> for FieldChange {
    fn from(mut parts: Vec<Value>) -> Self {
        parts.resize(3, Value::Null);
        Self {
            elapsed_ms: parts[2].as_i64(),
            old: parts[1].take(),
            new: parts[0].take(),
        }
    }
}

/// Changed fields keyed by field name.
pub type Changes = BTreeMap<String, FieldChange>;

/// Top-level scalar (non-object, non-array) fields of a JSON object.
pub fn scalar_fields(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_object() && !v.is_array())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Map::new(),
    }
}

/// Diff two scalar snapshots. A key missing on one side compares as `null`.
pub fn diff_scalars(before: &Map<String, Value>, after: &Map<String, Value>) -> Changes {
    let mut changes = Changes::new();

    for (key, new) in after {
        let old = before.get(key).unwrap_or(&Value::Null);
        if old != new {
            changes.insert(key.clone(), FieldChange::new(new.clone(), old.clone()));
        }
    }

    for (key, old) in before {
        if !after.contains_key(key) && !old.is_null() {
            changes.insert(key.clone(), FieldChange::new(Value::Null, old.clone()));
        }
    }

    changes
}

/// Id-level summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct Diff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl Diff {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.removed.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_changes() {
        let a = scalar_fields(&json!({ "status": "online", "tags": ["a"] }));
        assert!(diff_scalars(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_status_change() {
        let before = scalar_fields(&json!({ "id": "usr_1", "status": "online" }));
        let after = scalar_fields(&json!({ "id": "usr_1", "status": "busy" }));

        let changes = diff_scalars(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["status"], FieldChange::new(json!("busy"), json!("online")));
    }

    #[test]
    fn test_objects_and_arrays_ignored() {
        let before = scalar_fields(&json!({ "tags": ["a"], "details": { "x": 1 } }));
        let after = scalar_fields(&json!({ "tags": ["b"], "details": { "x": 2 } }));
        assert!(diff_scalars(&before, &after).is_empty());
    }

    #[test]
    fn test_field_change_serializes_as_tuple() {
        let mut change = FieldChange::new(json!("wrld_2:1"), json!("wrld_1:1"));
        assert_eq!(serde_json::to_value(&change).unwrap(), json!(["wrld_2:1", "wrld_1:1"]));

        change.elapsed_ms = Some(1500);
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value, json!(["wrld_2:1", "wrld_1:1", 1500]));

        let back: FieldChange = serde_json::from_value(value).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn test_diff_counts() {
        let diff = Diff {
            added: vec!["a".into()],
            updated: vec![],
            removed: vec!["b".into(), "c".into()],
        };
        assert!(diff.has_changes());
        assert_eq!(diff.change_count(), 3);
        assert!(!Diff::default().has_changes());
    }
}
