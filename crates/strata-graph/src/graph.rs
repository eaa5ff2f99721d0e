//! The dependency graph: nodes, adjacency, validation, and ordering.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use strata_core::strata_graph;

use crate::edge::DependencyEdge;
use crate::error::GraphError;
use crate::plan::{ExecutionLayer, ExecutionPlan};
use crate::source::{default_sources, DependencySource, GraphNode};

/// Directed acyclic dependency graph over step names.
///
/// Not internally synchronized: built once by the configuration layer, then
/// read-only for the rest of the run.
#[derive(Default, Debug)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    successors: HashMap<String, BTreeSet<String>>,
    predecessors: HashMap<String, BTreeSet<String>>,
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from node configs by running each dependency source.
    /// Fails when an edge references a step outside the node map.
    pub fn from_node_configs(
        nodes: &BTreeMap<String, GraphNode>,
        sources: &[Box<dyn DependencySource>],
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for name in nodes.keys() {
            graph.add_node(name.clone());
        }
        for (name, cfg) in nodes {
            for source in sources {
                for edge in source.extract(name, cfg, nodes) {
                    if !nodes.contains_key(&edge.from) {
                        return Err(GraphError::UnknownReference {
                            node: name.clone(),
                            missing: edge.from,
                        });
                    }
                    graph.add_edge(edge);
                }
            }
        }
        strata_graph!(
            debug,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    /// Builds with the default data + explicit sources.
    pub fn from_nodes(nodes: &BTreeMap<String, GraphNode>) -> Result<Self, GraphError> {
        Self::from_node_configs(nodes, &default_sources())
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.nodes.insert(edge.from.clone());
        self.nodes.insert(edge.to.clone());
        self.successors
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.to.clone());
        self.predecessors
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.from.clone());
        self.edges.push(edge);
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn predecessors(&self, node: &str) -> BTreeSet<String> {
        self.predecessors.get(node).cloned().unwrap_or_default()
    }

    pub fn successors(&self, node: &str) -> BTreeSet<String> {
        self.successors.get(node).cloned().unwrap_or_default()
    }

    /// Every node reachable downstream of `start` (excluding `start`).
    pub fn descendants(&self, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = self.successors(start).into_iter().collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node.clone()) {
                queue.extend(self.successors(&node));
            }
        }
        seen
    }

    /// Kahn's algorithm. Returns one topological order, or the cycle that
    /// prevents one.
    pub fn toposort(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.as_str(),
                    self.predecessors.get(n).map(BTreeSet::len).unwrap_or(0),
                )
            })
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            if let Some(succs) = self.successors.get(node) {
                for succ in succs {
                    let d = in_degree.get_mut(succ.as_str()).expect("known node");
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(succ.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self
                .find_cycle()
                .unwrap_or_else(|| self.nodes.iter().cloned().collect());
            return Err(GraphError::Cycle { cycle });
        }
        Ok(order)
    }

    pub fn has_cycle(&self) -> bool {
        self.toposort().is_err()
    }

    /// DFS back-traversal locating one concrete cycle, closed with a repeat
    /// of its first node.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        let mut path = Vec::new();

        for start in &self.nodes {
            if !visited.contains(start.as_str()) {
                if let Some(cycle) =
                    self.dfs_cycle(start, &mut visited, &mut stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        stack.insert(node);
        path.push(node);

        if let Some(succs) = self.successors.get(node) {
            for succ in succs {
                if !visited.contains(succ.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(succ, visited, stack, path) {
                        return Some(cycle);
                    }
                } else if stack.contains(succ.as_str()) {
                    let start = path.iter().position(|n| *n == succ.as_str())?;
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(succ.to_string());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        stack.remove(node);
        None
    }

    /// Groups nodes into layers of mutually independent work and computes
    /// the critical path. Layer k contains every node whose predecessors all
    /// completed in layers < k; nodes inside a layer are sorted by name so
    /// plans are deterministic.
    pub fn build_execution_plan(&self) -> Result<ExecutionPlan, GraphError> {
        if self.nodes.is_empty() {
            return Ok(ExecutionPlan::empty());
        }

        let mut remaining: BTreeSet<String> = self.nodes.iter().cloned().collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|node| {
                    self.predecessors
                        .get(node.as_str())
                        .map(|preds| preds.iter().all(|p| completed.contains(p)))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                let cycle = self
                    .find_cycle()
                    .unwrap_or_else(|| remaining.iter().cloned().collect());
                return Err(GraphError::Cycle { cycle });
            }

            for node in &ready {
                remaining.remove(node);
                completed.insert(node.clone());
            }
            layers.push(ExecutionLayer::new(layers.len(), ready));
        }

        let critical_path = self.critical_path()?;
        strata_graph!(
            debug,
            layers = layers.len(),
            critical = critical_path.len(),
            "execution plan computed"
        );
        Ok(ExecutionPlan::new(layers, self.nodes.len(), critical_path))
    }

    /// Longest source-to-sink chain, by dynamic programming over a
    /// topological order.
    fn critical_path(&self) -> Result<Vec<String>, GraphError> {
        let order = self.toposort()?;
        if order.is_empty() {
            return Ok(Vec::new());
        }

        let mut dist: HashMap<String, usize> =
            order.iter().map(|n| (n.clone(), 0)).collect();
        let mut prev: HashMap<String, String> = HashMap::new();

        for node in &order {
            let base = dist[node];
            if let Some(succs) = self.successors.get(node.as_str()) {
                for succ in succs {
                    if base + 1 > dist[succ] {
                        dist.insert(succ.clone(), base + 1);
                        prev.insert(succ.clone(), node.clone());
                    }
                }
            }
        }

        let end = order
            .iter()
            .max_by_key(|n| dist[*n])
            .expect("non-empty order")
            .clone();
        let mut path = vec![end];
        while let Some(p) = prev.get(path.last().expect("non-empty path")) {
            path.push(p.clone());
        }
        path.reverse();
        Ok(path)
    }

    /// Checks adjacency consistency: every edge endpoint is a known node.
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.nodes.contains(endpoint) {
                    return Err(GraphError::UnknownReference {
                        node: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
