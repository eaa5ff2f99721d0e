//! Per-node and per-flow run records: metrics, lineage, and the assembled
//! flow result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Terminal state of one node in a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Failed,
    /// Failed under `soft_fail`; the flow continued.
    SoftFailed,
    /// Not executed because an upstream failed or was skipped.
    Skipped,
    Cancelled,
}

impl NodeStatus {
    /// Whether downstream nodes may consume this node's outputs.
    pub fn produced_outputs(&self) -> bool {
        matches!(self, NodeStatus::Completed)
    }
}

/// Execution record for one node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub status: NodeStatus,
    pub duration_ms: u64,
    pub cached: bool,
    pub signature: Option<String>,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl NodeMetrics {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Skipped,
            duration_ms: 0,
            cached: false,
            signature: None,
            retries: 0,
            error: None,
            skip_reason: Some(reason.into()),
        }
    }
}

/// Data lineage for one node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineageRecord {
    /// Resolved upstream dataset keys.
    pub inputs: Vec<String>,
    /// Produced dataset keys.
    pub outputs: Vec<String>,
    pub primary_output: Option<String>,
    pub signature: Option<String>,
    pub duration_ms: u64,
    pub cached: bool,
}

/// Wall-clock accounting for one layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerMetrics {
    pub layer: usize,
    pub nodes: Vec<String>,
    pub elapsed_ms: u64,
}

/// Aggregate cache accounting for a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub node_total: usize,
    pub cache_hits: usize,
    pub cache_miss: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
    /// Cumulative execution time of uncached nodes.
    pub total_execution_ms: u64,
}

impl CacheStats {
    pub fn from_metrics(metrics: &BTreeMap<String, NodeMetrics>) -> Self {
        let node_total = metrics.len();
        let cache_hits = metrics.values().filter(|m| m.cached).count();
        let total_execution_ms = metrics
            .values()
            .filter(|m| !m.cached)
            .map(|m| m.duration_ms)
            .sum();
        Self {
            node_total,
            cache_hits,
            cache_miss: node_total - cache_hits,
            hit_rate: (node_total > 0).then(|| cache_hits as f64 / node_total as f64),
            total_execution_ms,
        }
    }
}

/// Overall outcome of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Completed,
    /// Nodes failed but `soft_fail` kept the flow alive.
    CompletedWithFailures,
    Failed,
}

/// The assembled run report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowResult {
    pub pipeline: String,
    pub status: FlowStatus,
    pub started_at: String,
    pub finished_at: String,
    pub executed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub cached_steps: Vec<String>,
    pub layers: Vec<LayerMetrics>,
    pub node_metrics: BTreeMap<String, NodeMetrics>,
    pub lineage: BTreeMap<String, LineageRecord>,
    pub cache: CacheStats,
}

impl FlowResult {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            FlowStatus::Completed | FlowStatus::CompletedWithFailures => 0,
            FlowStatus::Failed => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(status: NodeStatus, cached: bool, duration_ms: u64) -> NodeMetrics {
        NodeMetrics {
            status,
            duration_ms,
            cached,
            signature: None,
            retries: 0,
            error: None,
            skip_reason: None,
        }
    }

    #[test]
    fn cache_stats_aggregate() {
        let mut metrics = BTreeMap::new();
        metrics.insert("a".to_string(), metric(NodeStatus::Completed, true, 5));
        metrics.insert("b".to_string(), metric(NodeStatus::Completed, false, 40));
        let stats = CacheStats::from_metrics(&metrics);
        assert_eq!(stats.node_total, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_miss, 1);
        assert_eq!(stats.hit_rate, Some(0.5));
        assert_eq!(stats.total_execution_ms, 40);
    }

    #[test]
    fn only_completed_nodes_produce_outputs() {
        assert!(NodeStatus::Completed.produced_outputs());
        for status in [
            NodeStatus::Failed,
            NodeStatus::SoftFailed,
            NodeStatus::Skipped,
            NodeStatus::Cancelled,
        ] {
            assert!(!status.produced_outputs());
        }
    }
}
