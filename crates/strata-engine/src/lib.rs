//! The strata execution engine.
//!
//! Runs a compiled pipeline layer by layer: within a layer, nodes fan out to
//! a bounded worker pool; layers synchronize so every node observes every
//! completed upstream output. Each node resolves its references from the
//! catalog, checks the signature cache, dispatches its method chain through
//! late-binding handles, and records lineage and metrics. Failures write
//! snapshots and either abort the flow or, under `soft_fail`, skip the
//! failed subtree and continue.

pub mod cancel;
pub mod catalog;
pub mod context;
pub mod error;
pub mod executor;
pub mod result;
pub mod scheduler;
pub mod signature;
pub mod snapshot;

pub use cancel::CancelToken;
pub use catalog::Catalog;
pub use context::{FlowContext, RunOptions};
pub use error::EngineError;
pub use result::{
    CacheStats, FlowResult, FlowStatus, LayerMetrics, LineageRecord, NodeMetrics, NodeStatus,
};
pub use scheduler::ExecutionEngine;
pub use signature::NodeSignature;
pub use snapshot::{FailureSnapshot, OutputStore, SignatureStore};
