//! Layered execution plans.

use serde::{Deserialize, Serialize};

/// A set of mutually independent nodes, safe to schedule in parallel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLayer {
    pub index: usize,
    pub nodes: Vec<String>,
}

impl ExecutionLayer {
    pub fn new(index: usize, nodes: Vec<String>) -> Self {
        Self { index, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The full layered plan plus the critical path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub layers: Vec<ExecutionLayer>,
    pub total_nodes: usize,
    /// Longest source-to-sink chain; its length lower-bounds wall-clock
    /// time under perfect parallelism.
    pub critical_path: Vec<String>,
}

impl ExecutionPlan {
    pub fn new(layers: Vec<ExecutionLayer>, total_nodes: usize, critical_path: Vec<String>) -> Self {
        Self {
            layers,
            total_nodes,
            critical_path,
        }
    }

    pub fn empty() -> Self {
        Self {
            layers: Vec::new(),
            total_nodes: 0,
            critical_path: Vec::new(),
        }
    }

    /// Widest layer size.
    pub fn max_parallelism(&self) -> usize {
        self.layers.iter().map(ExecutionLayer::len).max().unwrap_or(0)
    }

    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Layer order flattened into one sequential list.
    pub fn flatten(&self) -> Vec<String> {
        self.layers
            .iter()
            .flat_map(|l| l.nodes.iter().cloned())
            .collect()
    }
}
