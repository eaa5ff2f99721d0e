//! Shared per-flow state.
//!
//! A [`FlowContext`] owns the compiled pipeline, the catalog, and the
//! signature map for the lifetime of one flow. Re-running the same context
//! keeps catalog contents and signatures, which is what makes warm re-runs
//! cache-hit; a fresh flow gets a fresh context.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use strata_config::CompiledPipeline;

use crate::cancel::CancelToken;
use crate::catalog::Catalog;
use crate::signature::NodeSignature;

/// Per-run directives.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Bypass every cache check.
    pub force: bool,
    /// Re-execute failed steps (and their descendants) from snapshots,
    /// trusting prior successful steps' persisted signatures.
    pub resume: bool,
    /// Where `.pipeline/` state lives. `None` disables persistence.
    pub project_root: Option<PathBuf>,
}

pub struct FlowContext {
    pub pipeline: Arc<CompiledPipeline>,
    pub catalog: Arc<Catalog>,
    /// Last known signature per step: computed this run, carried over from
    /// a previous run of this context, or trusted from the persisted index
    /// under resume.
    pub signatures: Arc<DashMap<String, NodeSignature>>,
    pub options: RunOptions,
    pub cancel: CancelToken,
}

impl FlowContext {
    pub fn new(pipeline: CompiledPipeline) -> Self {
        Self::with_options(pipeline, RunOptions::default())
    }

    pub fn with_options(pipeline: CompiledPipeline, options: RunOptions) -> Self {
        Self::with_shared_state(
            pipeline,
            Arc::new(Catalog::new()),
            Arc::new(DashMap::new()),
            options,
        )
    }

    /// Context over pre-existing catalog and signature state. This is how a
    /// recompiled pipeline (config edit, new registrations) runs warm
    /// against the previous run's cache.
    pub fn with_shared_state(
        pipeline: CompiledPipeline,
        catalog: Arc<Catalog>,
        signatures: Arc<DashMap<String, NodeSignature>>,
        options: RunOptions,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            catalog,
            signatures,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Token for external cancellation of this flow.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
