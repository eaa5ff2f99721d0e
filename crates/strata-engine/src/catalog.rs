//! The dataset catalog: `step__output` -> value.
//!
//! Concurrent reads and writes; a key written by one node happens-before
//! reads by downstream nodes because layers synchronize. The engine tracks
//! per-run writes separately so the same key is never produced twice within
//! one run, while re-runs against the same context may refresh values.

use dashmap::DashMap;
use strata_core::Value;

#[derive(Default)]
pub struct Catalog {
    data: DashMap<String, Value>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Sorted key listing, for reports and tests.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Snapshot of every entry, sorted by key; used when persisting the
    /// output index.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self
            .data
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
