use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::contract::TypedRecord;

/// Variable bindings visible to one run.
///
/// Keys are flat strings; dotted names like `summary.title` are ordinary
/// keys. Values are JSON so file contents, typed fields and user globals
/// share one map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    data: HashMap<String, serde_json::Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: HashMap<String, serde_json::Value>) -> Self {
        Self { data }
    }

    /// Layer `local` over `base`; `local` wins on conflict.
    pub fn layered(base: &Variables, local: &Variables) -> Self {
        let mut merged = base.clone();
        merged.merge(local);
        merged
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Merge another map into this one (overwrites on conflict).
    pub fn merge(&mut self, other: &Variables) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Fold a finalized record into the map: every field under its own name,
    /// and under `<id>.<field>` when the producing task has an id.
    pub fn ingest_record(&mut self, record: &TypedRecord, task_id: Option<&str>) {
        for (name, value) in record.iter() {
            let json = value.to_json();
            if let Some(id) = task_id {
                self.data.insert(format!("{}.{}", id, name), json.clone());
            }
            self.data.insert(name.to_string(), json);
        }
    }

    /// Publish a response under `prefix`, and each of its object fields
    /// under `<prefix>.<field>`.
    pub fn ingest_prefixed(&mut self, prefix: &str, response: &serde_json::Value) {
        if let Some(obj) = response.as_object() {
            for (k, v) in obj {
                self.data.insert(format!("{}.{}", prefix, k), v.clone());
            }
        }
        self.data.insert(prefix.to_string(), response.clone());
    }

    /// Text form of a value as substituted into templates.
    pub fn display(&self, key: &str) -> Option<String> {
        self.data.get(key).map(display_value)
    }

    /// Sorted keys, for diagnostics.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.data.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for Variables {
    fn from_iter<T: IntoIterator<Item = (K, serde_json::Value)>>(iter: T) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
