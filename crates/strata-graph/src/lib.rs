//! Typed dependency graph for flow planning.
//!
//! Step declarations become nodes and [`DependencyEdge`]s extracted by
//! pluggable [`DependencySource`]s. The graph validates (no cycles, no
//! unknown references), topologically sorts, and groups nodes into
//! [`ExecutionLayer`]s of mutually independent work — the unit of parallel
//! scheduling.

pub mod edge;
pub mod error;
pub mod export;
pub mod graph;
pub mod plan;
pub mod source;

pub use edge::{DependencyEdge, DependencyType};
pub use error::GraphError;
pub use export::{to_graphviz, to_mermaid, to_text};
pub use graph::DependencyGraph;
pub use plan::{ExecutionLayer, ExecutionPlan};
pub use source::{
    DataDependencySource, DependencySource, ExplicitDependencySource, GraphNode,
};
