//! Layer-by-layer flow scheduling.
//!
//! Layers run sequentially; nodes inside a layer fan out onto a worker pool
//! bounded by a semaphore. The layer barrier gives the ordering guarantee
//! downstream nodes rely on: every catalog write in layer k happens before
//! any read in layer k+1. Layering trades some parallelism for predictable
//! progress and clean hook semantics; the critical path in the plan tells
//! users when that trade bites.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use strata_core::{strata_sched, Value};
use strata_registry::{HookBus, HookContext, HookEvent, Registry};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::FlowContext;
use crate::error::EngineError;
use crate::executor::{NodeOutcome, NodeRunner};
use crate::result::{
    CacheStats, FlowResult, FlowStatus, LayerMetrics, LineageRecord, NodeMetrics, NodeStatus,
};
use crate::snapshot::{FailureSnapshot, OutputStore, SignatureStore};

pub struct ExecutionEngine {
    registry: Arc<Registry>,
    hooks: Arc<HookBus>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            hooks: HookBus::global(),
        }
    }

    /// Engine with a private hook bus (tests).
    pub fn with_hooks(registry: Arc<Registry>, hooks: Arc<HookBus>) -> Self {
        Self { registry, hooks }
    }

    /// Executes the context's pipeline to completion.
    ///
    /// Fatal node failures (without `soft_fail`) abort after the current
    /// layer drains and surface as the error; soft failures and skips are
    /// reported in the returned [`FlowResult`].
    pub async fn run(&self, ctx: &FlowContext) -> Result<FlowResult, EngineError> {
        let pipeline = Arc::clone(&ctx.pipeline);
        let orchestration = pipeline.orchestration.clone();
        let started_at = Utc::now();
        let flow_start = Instant::now();

        strata_sched!(
            info,
            pipeline = %pipeline.name,
            nodes = pipeline.nodes.len(),
            layers = pipeline.plan.depth(),
            workers = orchestration.effective_workers(),
            soft_fail = orchestration.soft_fail,
            "starting flow"
        );
        self.hooks.emit(HookContext::flow(
            HookEvent::BeforeFlow,
            Value::from(pipeline.name.clone()),
        ));

        let statuses: Arc<DashMap<String, NodeStatus>> = Arc::new(DashMap::new());
        let mut metrics: BTreeMap<String, NodeMetrics> = BTreeMap::new();
        let mut lineage: BTreeMap<String, LineageRecord> = BTreeMap::new();
        let mut layer_metrics = Vec::new();

        // Resume: decide which steps re-run and trust the rest.
        let resume_skip = if ctx.options.resume {
            self.prepare_resume(ctx, &statuses, &mut metrics)?
        } else {
            BTreeSet::new()
        };

        let runner = Arc::new(NodeRunner {
            registry: Arc::clone(&self.registry),
            hooks: Arc::clone(&self.hooks),
            catalog: Arc::clone(&ctx.catalog),
            signatures: Arc::clone(&ctx.signatures),
            statuses: Arc::clone(&statuses),
            written: Arc::new(Mutex::new(HashSet::new())),
            orchestration: orchestration.clone(),
            force: ctx.options.force,
            project_root: ctx.options.project_root.clone(),
            cancel: ctx.cancel.clone(),
        });

        // Pipeline granularity treats the whole flow as one sequential
        // unit; node granularity parallelizes within layers.
        let workers = match orchestration.granularity {
            strata_core::Granularity::Pipeline => 1,
            strata_core::Granularity::Node => orchestration.effective_workers(),
        };
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut fatal: Option<EngineError> = None;

        'layers: for layer in &pipeline.plan.layers {
            let nodes: Vec<_> = layer
                .nodes
                .iter()
                .filter(|name| !resume_skip.contains(*name))
                .filter_map(|name| pipeline.node(name))
                .cloned()
                .collect();
            if nodes.is_empty() {
                continue;
            }

            strata_sched!(
                info,
                layer = layer.index,
                nodes = ?nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
                "dispatching layer"
            );
            let layer_start = Instant::now();
            let mut outcomes = Vec::with_capacity(nodes.len());

            if workers <= 1 {
                // Sequential runner: in-order execution within the layer.
                for node in nodes.iter() {
                    outcomes.push(runner.run_node(Arc::clone(node)).await);
                }
            } else {
                let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
                for node in nodes.iter() {
                    let runner = Arc::clone(&runner);
                    let node = Arc::clone(node);
                    let semaphore = Arc::clone(&semaphore);
                    join_set.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.expect("pool open");
                        runner.run_node(node).await
                    });
                }
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(join_err) => {
                            // A panicking node is a hard engine failure.
                            fatal = Some(EngineError::Node {
                                step: "<worker>".to_string(),
                                signature: None,
                                source: anyhow::anyhow!("worker panicked: {join_err}"),
                            });
                        }
                    }
                }
            }

            layer_metrics.push(LayerMetrics {
                layer: layer.index,
                nodes: layer.nodes.clone(),
                elapsed_ms: layer_start.elapsed().as_millis() as u64,
            });

            for outcome in outcomes {
                metrics.insert(outcome.step.clone(), outcome.metrics);
                if let Some(record) = outcome.lineage {
                    lineage.insert(outcome.step.clone(), record);
                }
                if let Some(err) = outcome.fatal {
                    fatal.get_or_insert(err);
                }
            }

            if fatal.is_some() {
                ctx.cancel.cancel();
                break 'layers;
            }
        }

        self.persist_state(ctx)?;

        if let Some(err) = fatal {
            strata_sched!(
                error,
                pipeline = %pipeline.name,
                error = %err,
                "flow aborted"
            );
            return Err(err);
        }

        let finished_at = Utc::now();
        let cache = CacheStats::from_metrics(&metrics);
        let status = if metrics
            .values()
            .any(|m| m.status == NodeStatus::SoftFailed)
        {
            FlowStatus::CompletedWithFailures
        } else {
            FlowStatus::Completed
        };

        let pick = |want: fn(&NodeMetrics) -> bool| -> Vec<String> {
            metrics
                .iter()
                .filter(|(_, m)| want(m))
                .map(|(name, _)| name.clone())
                .collect()
        };
        let result = FlowResult {
            pipeline: pipeline.name.clone(),
            status,
            started_at: started_at.to_rfc3339(),
            finished_at: finished_at.to_rfc3339(),
            executed_steps: pick(|m| m.status == NodeStatus::Completed && !m.cached),
            failed_steps: pick(|m| {
                matches!(m.status, NodeStatus::Failed | NodeStatus::SoftFailed)
            }),
            skipped_steps: pick(|m| m.status == NodeStatus::Skipped),
            cached_steps: pick(|m| m.cached),
            layers: layer_metrics,
            node_metrics: metrics,
            lineage,
            cache,
        };

        self.persist_report(ctx, &result);

        strata_sched!(
            info,
            pipeline = %pipeline.name,
            duration_ms = flow_start.elapsed().as_millis() as u64,
            executed = result.executed_steps.len(),
            cached = result.cached_steps.len(),
            failed = result.failed_steps.len(),
            skipped = result.skipped_steps.len(),
            "flow finished"
        );
        self.hooks.emit(HookContext::flow(
            HookEvent::AfterFlow,
            Value::from(pipeline.name.clone()),
        ));

        Ok(result)
    }

    /// Loads failure snapshots and the persisted cache indexes; returns the
    /// steps to skip (completed in the prior run and not downstream of a
    /// failure). A trusted step needs both its stored signature and every
    /// declared output replayable from the output index — the outputs are
    /// re-seeded into the catalog so re-running descendants (including
    /// fan-in nodes fed by untouched branches) can resolve their inputs.
    /// Snapshot upstream values are seeded as well, covering state written
    /// before the output index existed.
    fn prepare_resume(
        &self,
        ctx: &FlowContext,
        statuses: &DashMap<String, NodeStatus>,
        metrics: &mut BTreeMap<String, NodeMetrics>,
    ) -> Result<BTreeSet<String>, EngineError> {
        let Some(root) = &ctx.options.project_root else {
            return Ok(BTreeSet::new());
        };
        let snapshots = FailureSnapshot::load_all(root)?;
        if snapshots.is_empty() {
            strata_sched!(info, "resume requested but no failure snapshots found");
            return Ok(BTreeSet::new());
        }
        let store = SignatureStore::load(root)?;
        let outputs = OutputStore::load(root)?;

        let mut rerun: BTreeSet<String> = BTreeSet::new();
        for snap in &snapshots {
            rerun.insert(snap.step_name.clone());
            rerun.extend(ctx.pipeline.graph.descendants(&snap.step_name));
            for (dataset, value) in &snap.upstream_outputs {
                ctx.catalog.insert(dataset.clone(), value.clone());
            }
        }

        let mut skip = BTreeSet::new();
        for node in &ctx.pipeline.nodes {
            if rerun.contains(&node.name) {
                continue;
            }
            let Some(signature) = store.get(&node.name) else {
                // No trusted signature: run it again.
                continue;
            };
            if !node.outputs.iter().all(|ds| outputs.contains(ds)) {
                // Signature without replayable outputs: run it again rather
                // than skipping descendants into missing_upstream.
                strata_sched!(
                    info,
                    step = %node.name,
                    "stored signature has no replayable outputs, re-running"
                );
                continue;
            }
            for dataset in &node.outputs {
                if let Some(value) = outputs.get(dataset) {
                    ctx.catalog.insert(dataset.clone(), value.clone());
                }
            }
            ctx.signatures
                .insert(node.name.clone(), signature.clone());
            statuses.insert(node.name.clone(), NodeStatus::Completed);
            metrics.insert(
                node.name.clone(),
                NodeMetrics {
                    status: NodeStatus::Completed,
                    duration_ms: 0,
                    cached: true,
                    signature: Some(signature.digest.clone()),
                    retries: 0,
                    error: None,
                    skip_reason: None,
                },
            );
            skip.insert(node.name.clone());
        }

        strata_sched!(
            info,
            rerun = ?rerun,
            trusted = skip.len(),
            "resume plan computed"
        );
        Ok(skip)
    }

    /// Persists the signature and output indexes.
    fn persist_state(&self, ctx: &FlowContext) -> Result<(), EngineError> {
        let Some(root) = &ctx.options.project_root else {
            return Ok(());
        };
        let mut store = SignatureStore::load(root)?;
        for entry in ctx.signatures.iter() {
            store.insert(entry.key().clone(), entry.value().clone());
        }
        store.save(root)?;

        let mut outputs = OutputStore::load(root)?;
        for (dataset, value) in ctx.catalog.entries() {
            outputs.insert(dataset, value);
        }
        outputs.save(root)
    }

    /// Persists the run report for `strata metrics`. Failure to write the
    /// report never fails the flow.
    fn persist_report(&self, ctx: &FlowContext, result: &FlowResult) {
        let Some(root) = &ctx.options.project_root else {
            return;
        };
        let path = strata_core::paths::last_run_report(root);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(result) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&path, json) {
                    strata_sched!(warn, error = %err, "run report not written");
                }
            }
            Err(err) => strata_sched!(warn, error = %err, "run report not serializable"),
        }
    }
}
