//! Dependency edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a dependency came from. Useful for debugging and visualization;
/// only `Data` edges carry dataset flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyType {
    /// Derived from a producer/consumer dataset relationship.
    Data,
    /// Declared via `depends_on`; pure ordering, no data flow.
    Explicit,
    /// Shared resource constraint.
    Resource,
    /// Time-window constraint.
    Temporal,
}

/// A directed arc `from -> to`: `to` depends on `from`, so `from` must run
/// first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub dep_type: DependencyType,
    /// Source-specific annotations (e.g. the dataset name for data edges).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, dep_type: DependencyType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            dep_type,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
