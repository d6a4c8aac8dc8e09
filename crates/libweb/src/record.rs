//! Ordered key/value records yielded to callers

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured output unit
///
/// Keys keep their insertion order, so consumers see fields in the order the
/// extraction spec declared them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(IndexMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record holding a single field
    pub fn single(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut record = Self::new();
        record.insert(key, value);
        record
    }

    /// Set `key`, replacing any previous value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.0
    }
}

impl From<IndexMap<String, Value>> for Record {
    fn from(map: IndexMap<String, Value>) -> Self {
        Record(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record(iter.into_iter().collect())
    }
}

/// Accumulates multi-match results into one record
///
/// The first match for a key is stored as a scalar; the second promotes it
/// to a list and later matches are appended. Counting matches (rather than
/// inspecting the stored value) keeps a single match that is itself an
/// array from being mistaken for a promoted list.
#[derive(Debug, Default)]
pub struct Coalescer {
    values: IndexMap<String, (usize, Value)>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: Value) {
        match self.values.get_mut(key) {
            None => {
                self.values.insert(key.to_string(), (1, value));
            }
            Some((count, stored)) => {
                if *count == 1 {
                    let first = stored.take();
                    *stored = Value::Array(vec![first, value]);
                } else if let Value::Array(items) = stored {
                    items.push(value);
                }
                *count += 1;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn finish(self) -> Record {
        self.values
            .into_iter()
            .map(|(key, (_, value))| (key, value))
            .collect()
    }
}
