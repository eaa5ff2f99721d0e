//! Target-scoped tracing macros for the strata workspace.
//!
//! Every subsystem logs under its own target so operators can filter with
//! `EnvFilter` expressions like `strata::sched=debug,strata::cache=trace`.

/// Trace scheduler-level events (layer dispatch, worker pool, completion).
#[macro_export]
macro_rules! strata_sched {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "strata::sched", $($arg)*)
    }
}

/// Trace per-node execution (dispatch, chain progress, capture).
#[macro_export]
macro_rules! strata_node {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "strata::node", $($arg)*)
    }
}

/// Trace registry activity (registration, selection, refresh).
#[macro_export]
macro_rules! strata_registry {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "strata::registry", $($arg)*)
    }
}

/// Trace cache decisions (hits, misses, signature diffs, persistence).
#[macro_export]
macro_rules! strata_cache {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "strata::cache", $($arg)*)
    }
}

/// Trace graph construction (edges, layering, critical path).
#[macro_export]
macro_rules! strata_graph {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "strata::graph", $($arg)*)
    }
}
