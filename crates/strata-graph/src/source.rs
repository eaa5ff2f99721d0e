//! Dependency extraction sources.
//!
//! Each source inspects one node against the full node map and yields the
//! node's inbound edges. New dependency kinds plug in by implementing
//! [`DependencySource`].

use std::collections::BTreeMap;

use crate::edge::{DependencyEdge, DependencyType};

/// The dependency-relevant slice of one node's configuration.
#[derive(Clone, Debug, Default)]
pub struct GraphNode {
    /// Dataset keys this node consumes.
    pub inputs: Vec<String>,
    /// Dataset keys this node produces.
    pub outputs: Vec<String>,
    /// Explicitly declared upstream step names.
    pub depends_on: Vec<String>,
}

/// Extracts inbound edges for one node.
pub trait DependencySource: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(
        &self,
        node_name: &str,
        node: &GraphNode,
        all_nodes: &BTreeMap<String, GraphNode>,
    ) -> Vec<DependencyEdge>;
}

/// Derives edges from producer/consumer dataset relationships: if another
/// node declares an output this node consumes, that node must run first.
pub struct DataDependencySource;

impl DependencySource for DataDependencySource {
    fn name(&self) -> &'static str {
        "data"
    }

    fn extract(
        &self,
        node_name: &str,
        node: &GraphNode,
        all_nodes: &BTreeMap<String, GraphNode>,
    ) -> Vec<DependencyEdge> {
        let mut producers: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, cfg) in all_nodes {
            for out in &cfg.outputs {
                producers.insert(out.as_str(), name.as_str());
            }
        }

        let mut edges = Vec::new();
        for input in &node.inputs {
            if let Some(&producer) = producers.get(input.as_str()) {
                if producer != node_name {
                    edges.push(
                        DependencyEdge::new(producer, node_name, DependencyType::Data)
                            .with_metadata("dataset", input.clone()),
                    );
                }
            }
        }
        edges
    }
}

/// Emits one edge per `depends_on` entry.
pub struct ExplicitDependencySource;

impl DependencySource for ExplicitDependencySource {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn extract(
        &self,
        node_name: &str,
        node: &GraphNode,
        _all_nodes: &BTreeMap<String, GraphNode>,
    ) -> Vec<DependencyEdge> {
        node.depends_on
            .iter()
            .map(|dep| {
                DependencyEdge::new(dep.clone(), node_name, DependencyType::Explicit)
                    .with_metadata("declared_in", "depends_on")
            })
            .collect()
    }
}

/// The default source set.
pub fn default_sources() -> Vec<Box<dyn DependencySource>> {
    vec![Box::new(DataDependencySource), Box::new(ExplicitDependencySource)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> BTreeMap<String, GraphNode> {
        let mut map = BTreeMap::new();
        map.insert(
            "load".to_string(),
            GraphNode {
                outputs: vec!["load__raw".to_string()],
                ..Default::default()
            },
        );
        map.insert(
            "clean".to_string(),
            GraphNode {
                inputs: vec!["load__raw".to_string()],
                outputs: vec!["clean__df".to_string()],
                depends_on: vec!["audit".to_string()],
            },
        );
        map.insert("audit".to_string(), GraphNode::default());
        map
    }

    #[test]
    fn data_source_links_producer_to_consumer() {
        let all = nodes();
        let edges = DataDependencySource.extract("clean", &all["clean"], &all);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "load");
        assert_eq!(edges[0].to, "clean");
        assert_eq!(edges[0].dep_type, DependencyType::Data);
        assert_eq!(edges[0].metadata["dataset"], "load__raw");
    }

    #[test]
    fn data_source_skips_self_dependency() {
        let mut all = BTreeMap::new();
        all.insert(
            "a".to_string(),
            GraphNode {
                inputs: vec!["a__x".to_string()],
                outputs: vec!["a__x".to_string()],
                ..Default::default()
            },
        );
        assert!(DataDependencySource.extract("a", &all["a"], &all).is_empty());
    }

    #[test]
    fn explicit_source_emits_declared_edges() {
        let all = nodes();
        let edges = ExplicitDependencySource.extract("clean", &all["clean"], &all);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "audit");
        assert_eq!(edges[0].dep_type, DependencyType::Explicit);
    }
}
