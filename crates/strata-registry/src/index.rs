//! Hierarchical registration index.
//!
//! Three-level lookup `component -> method -> engine -> registration` plus a
//! flat full-key map. The index itself is a plain container; all locking and
//! conflict handling lives in the registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::registration::Registration;

#[derive(Default)]
pub struct RegistryIndex {
    /// component -> method -> engine -> registration, engines in insertion
    /// order (strategies break ties by insertion order).
    by_component: HashMap<String, HashMap<String, Vec<(String, Arc<Registration>)>>>,
    by_full_key: HashMap<String, Arc<Registration>>,
}

impl RegistryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces under the registration's full key.
    pub fn add(&mut self, reg: Arc<Registration>) {
        let engines = self
            .by_component
            .entry(reg.component.clone())
            .or_default()
            .entry(reg.method.clone())
            .or_default();
        match engines.iter_mut().find(|(tag, _)| *tag == reg.engine) {
            Some(slot) => slot.1 = Arc::clone(&reg),
            None => engines.push((reg.engine.clone(), Arc::clone(&reg))),
        }
        self.by_full_key.insert(reg.full_key(), reg);
    }

    pub fn get_full(&self, full_key: &str) -> Option<Arc<Registration>> {
        self.by_full_key.get(full_key).cloned()
    }

    /// All implementations of a method, in insertion order.
    pub fn method_candidates(&self, component: &str, method: &str) -> Vec<Arc<Registration>> {
        self.by_component
            .get(component)
            .and_then(|methods| methods.get(method))
            .map(|engines| engines.iter().map(|(_, r)| Arc::clone(r)).collect())
            .unwrap_or_default()
    }

    /// Every registration, in arbitrary order.
    pub fn all(&self) -> Vec<Arc<Registration>> {
        self.by_full_key.values().cloned().collect()
    }

    /// Component names with at least one registration.
    pub fn components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_component.keys().cloned().collect();
        names.sort();
        names
    }

    /// Method names registered under a component.
    pub fn component_methods(&self, component: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_component
            .get(component)
            .map(|methods| methods.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.by_full_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_full_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_component.clear();
        self.by_full_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::fn_method;
    use strata_core::Value;

    fn reg(engine: &str) -> Arc<Registration> {
        Arc::new(Registration::new(
            "table",
            "clean",
            engine,
            fn_method(|_| Ok(Value::Null)),
        ))
    }

    #[test]
    fn candidates_preserve_insertion_order() {
        let mut idx = RegistryIndex::new();
        idx.add(reg("v1"));
        idx.add(reg("v2"));
        idx.add(reg("v3"));
        let engines: Vec<String> = idx
            .method_candidates("table", "clean")
            .iter()
            .map(|r| r.engine.clone())
            .collect();
        assert_eq!(engines, vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn replacement_keeps_position() {
        let mut idx = RegistryIndex::new();
        idx.add(reg("v1"));
        idx.add(reg("v2"));
        let replacement = Arc::new(
            Registration::new("table", "clean", "v1", fn_method(|_| Ok(Value::Null)))
                .with_priority(9),
        );
        idx.add(replacement);
        let cands = idx.method_candidates("table", "clean");
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].engine, "v1");
        assert_eq!(cands[0].priority, 9);
    }

    #[test]
    fn unknown_lookups_are_empty() {
        let idx = RegistryIndex::new();
        assert!(idx.method_candidates("x", "y").is_empty());
        assert!(idx.get_full("x::y::z").is_none());
    }
}
