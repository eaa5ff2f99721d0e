//! Per-node execution.
//!
//! One [`NodeRunner`] is shared by every worker in a run; `run_node` takes a
//! node through the full lifecycle: upstream gate, reference resolution,
//! signature computation, cache check, chain dispatch with retries and
//! timeout, output capture, and record keeping.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use strata_config::NodeConfig;
use strata_core::{strata_cache, strata_node, Orchestration, ParamValue, Value};
use strata_registry::{
    signature_part, HookBus, HookContext, HookEvent, MethodArgs, Registry,
};

use crate::cancel::CancelToken;
use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::result::{LineageRecord, NodeMetrics, NodeStatus};
use crate::signature::NodeSignature;
use crate::snapshot::FailureSnapshot;

/// Outcome handed back to the scheduler.
pub(crate) struct NodeOutcome {
    pub step: String,
    pub metrics: NodeMetrics,
    pub lineage: Option<LineageRecord>,
    /// Set when the failure must abort the flow.
    pub fatal: Option<EngineError>,
}

/// Shared per-run execution state.
pub(crate) struct NodeRunner {
    pub registry: Arc<Registry>,
    pub hooks: Arc<HookBus>,
    pub catalog: Arc<Catalog>,
    pub signatures: Arc<DashMap<String, NodeSignature>>,
    pub statuses: Arc<DashMap<String, NodeStatus>>,
    /// Datasets written this run; a second write to the same key is an
    /// engine bug.
    pub written: Arc<Mutex<HashSet<String>>>,
    pub orchestration: Orchestration,
    pub force: bool,
    pub project_root: Option<std::path::PathBuf>,
    pub cancel: CancelToken,
}

enum CacheDecision {
    Hit(NodeSignature),
    Miss(NodeSignature),
}

impl NodeRunner {
    pub async fn run_node(&self, node: Arc<NodeConfig>) -> NodeOutcome {
        let step = node.name.clone();
        let start = Instant::now();

        if self.cancel.is_cancelled() {
            return self.cancelled_outcome(&step, start);
        }

        // Upstream gate: every predecessor must have completed.
        if let Some(blocked_by) = self.blocked_by(&node) {
            strata_node!(
                info,
                step = %step,
                upstream = %blocked_by,
                "skipping node, upstream unavailable"
            );
            self.statuses.insert(step.clone(), NodeStatus::Skipped);
            return NodeOutcome {
                step,
                metrics: NodeMetrics::skipped("missing_upstream"),
                lineage: None,
                fatal: None,
            };
        }

        // Reference resolution against the catalog.
        let (resolved, upstream_values) = match self.resolve_parameters(&node) {
            Ok(pair) => pair,
            Err(missing) => {
                strata_node!(
                    info,
                    step = %step,
                    dataset = %missing,
                    "skipping node, unresolvable reference"
                );
                self.statuses.insert(step.clone(), NodeStatus::Skipped);
                return NodeOutcome {
                    step,
                    metrics: NodeMetrics::skipped("missing_upstream"),
                    lineage: None,
                    fatal: None,
                };
            }
        };

        // Signature + cache check.
        let (signature, predicted_engines) = self.compute_signature(&node);
        match self.check_cache(&node, signature) {
            CacheDecision::Hit(signature) => {
                return self.cache_hit_outcome(&node, signature, start);
            }
            CacheDecision::Miss(signature) => {
                self.execute_outcome(
                    node,
                    resolved,
                    upstream_values,
                    signature,
                    predicted_engines,
                    start,
                )
                .await
            }
        }
    }

    fn blocked_by(&self, node: &NodeConfig) -> Option<String> {
        for pred in node.predecessor_steps() {
            match self.statuses.get(&pred) {
                Some(status) if status.produced_outputs() => {}
                _ => return Some(pred),
            }
        }
        None
    }

    /// Resolves every parameter; references read the catalog. Returns the
    /// resolved named arguments and the upstream dataset map for lineage
    /// and snapshots. Errs with the missing dataset key.
    fn resolve_parameters(
        &self,
        node: &NodeConfig,
    ) -> Result<(BTreeMap<String, Value>, BTreeMap<String, Value>), String> {
        let mut resolved = BTreeMap::new();
        let mut upstream = BTreeMap::new();
        for (name, param) in &node.parameters {
            match param {
                ParamValue::Literal(value) => {
                    resolved.insert(name.clone(), value.clone());
                }
                ParamValue::Reference(r) => {
                    let dataset = r.dataset();
                    match self.catalog.get(&dataset) {
                        Some(value) => {
                            upstream.insert(dataset, value.clone());
                            resolved.insert(name.clone(), value);
                        }
                        None => return Err(dataset),
                    }
                }
            }
        }
        Ok((resolved, upstream))
    }

    /// Computes the node signature from predictions, literals, and upstream
    /// signatures. Also returns the predicted engine per method for the
    /// prediction-consistency warning at dispatch time.
    fn compute_signature(&self, node: &NodeConfig) -> (NodeSignature, Vec<Option<String>>) {
        let mut impl_parts = Vec::with_capacity(node.methods.len());
        let mut predicted_engines = Vec::with_capacity(node.methods.len());
        for (method, handle) in node.methods.iter().zip(&node.handles) {
            let prediction = handle.predict_signature(&self.registry);
            predicted_engines.push(prediction.as_ref().map(|p| p.engine.clone()));
            impl_parts.push(signature_part(method, prediction.as_ref()));
        }

        let literals = node.literal_parameters();
        let mut upstream = BTreeMap::new();
        for step in &node.upstream_steps {
            if let Some(sig) = self.signatures.get(step) {
                upstream.insert(step.clone(), sig.value().digest.clone());
            }
        }

        (
            NodeSignature::compute(&node.methods, &impl_parts, &literals, &upstream),
            predicted_engines,
        )
    }

    fn check_cache(&self, node: &NodeConfig, signature: NodeSignature) -> CacheDecision {
        if self.force {
            return CacheDecision::Miss(signature);
        }
        let Some(prev) = self.signatures.get(&node.name).map(|s| s.value().clone()) else {
            return CacheDecision::Miss(signature);
        };

        let present: Vec<&String> = node
            .outputs
            .iter()
            .filter(|ds| self.catalog.contains(ds))
            .collect();

        if prev.digest == signature.digest {
            let ttl_expired = node
                .cache_ttl
                .map(|ttl| {
                    let age = Utc::now().signed_duration_since(prev.recorded_at);
                    age.num_seconds() >= ttl.as_secs() as i64
                })
                .unwrap_or(false);
            if ttl_expired {
                strata_cache!(info, step = %node.name, "cache TTL expired, re-executing");
                return CacheDecision::Miss(signature);
            }
            if !node.outputs.is_empty() && present.len() == node.outputs.len() {
                return CacheDecision::Hit(prev);
            }
            if !present.is_empty() {
                // Partial state with a matching signature: corrupted cache.
                // Invalidate the entry and fall through to one re-execution.
                let missing: Vec<String> = node
                    .outputs
                    .iter()
                    .filter(|ds| !self.catalog.contains(ds))
                    .cloned()
                    .collect();
                let violation = EngineError::CacheIntegrity {
                    step: node.name.clone(),
                    missing,
                };
                strata_cache!(warn, error = %violation, "invalidating and re-executing");
                self.signatures.remove(&node.name);
            }
        } else if !present.is_empty() {
            strata_cache!(
                info,
                step = %node.name,
                reason = %prev.diff_reason(&signature),
                "cache miss, signature changed"
            );
        }
        CacheDecision::Miss(signature)
    }

    fn cache_hit_outcome(
        &self,
        node: &NodeConfig,
        signature: NodeSignature,
        start: Instant,
    ) -> NodeOutcome {
        let step = node.name.clone();
        strata_cache!(info, step = %step, "cache hit, skipping execution");
        self.statuses.insert(step.clone(), NodeStatus::Completed);

        let metrics = NodeMetrics {
            status: NodeStatus::Completed,
            duration_ms: start.elapsed().as_millis() as u64,
            cached: true,
            signature: Some(signature.digest.clone()),
            retries: 0,
            error: None,
            skip_reason: None,
        };
        let lineage = LineageRecord {
            inputs: node.inputs.clone(),
            outputs: node.outputs.clone(),
            primary_output: node.primary_output.clone(),
            signature: Some(signature.digest.clone()),
            duration_ms: metrics.duration_ms,
            cached: true,
        };
        self.hooks.emit(HookContext::node(
            HookEvent::OnCacheHit,
            step.clone(),
            Value::from(signature.digest),
        ));
        NodeOutcome {
            step,
            metrics,
            lineage: Some(lineage),
            fatal: None,
        }
    }

    async fn execute_outcome(
        &self,
        node: Arc<NodeConfig>,
        resolved: BTreeMap<String, Value>,
        upstream_values: BTreeMap<String, Value>,
        signature: NodeSignature,
        predicted_engines: Vec<Option<String>>,
        start: Instant,
    ) -> NodeOutcome {
        let step = node.name.clone();

        if !self.force {
            self.hooks.emit(HookContext::node(
                HookEvent::OnCacheMiss,
                step.clone(),
                Value::from(signature.digest.clone()),
            ));
        }
        self.hooks.emit(HookContext::node(
            HookEvent::BeforeNode,
            step.clone(),
            hook_map(&[
                ("signature", Value::from(signature.digest.clone())),
                (
                    "outputs",
                    Value::List(node.outputs.iter().map(|o| Value::from(o.as_str())).collect()),
                ),
            ]),
        ));

        let retry_count = self.orchestration.retry_count;
        let mut retries = 0u32;
        let result = loop {
            let attempt = self.attempt_chain(&node, &resolved, &predicted_engines);
            let outcome = match self.orchestration.node_timeout() {
                Some(limit) => {
                    tokio::select! {
                        r = tokio::time::timeout(limit, attempt) => match r {
                            Ok(inner) => inner,
                            Err(_) => Err(EngineError::Timeout {
                                step: step.clone(),
                                seconds: limit.as_secs(),
                            }),
                        },
                        _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
                    }
                }
                None => {
                    tokio::select! {
                        r = attempt => r,
                        _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
                    }
                }
            };

            match outcome {
                Ok(value) => break Ok(value),
                Err(EngineError::Cancelled) => break Err(EngineError::Cancelled),
                Err(err) if retries < retry_count => {
                    retries += 1;
                    strata_node!(
                        warn,
                        step = %step,
                        attempt = retries,
                        error = %err,
                        "node failed, retrying"
                    );
                    tokio::time::sleep(self.orchestration.retry_delay_duration()).await;
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(value) => self.complete_node(&node, value, upstream_values, signature, retries, start),
            Err(EngineError::Cancelled) => self.cancelled_outcome(&step, start),
            Err(err) => self.failed_node(&node, err, resolved, upstream_values, signature, retries, start),
        }
    }

    /// Runs the method chain once. The previous link's result becomes the
    /// next method's primary input when that registration opted in.
    async fn attempt_chain(
        &self,
        node: &NodeConfig,
        resolved: &BTreeMap<String, Value>,
        predicted_engines: &[Option<String>],
    ) -> Result<Value, EngineError> {
        let mut result: Option<Value> = None;
        for (idx, (method, handle)) in node.methods.iter().zip(&node.handles).enumerate() {
            let info = handle.resolve(&self.registry).map_err(|e| EngineError::Node {
                step: node.name.clone(),
                signature: None,
                source: e.into(),
            })?;

            if let Some(Some(predicted)) = predicted_engines.get(idx) {
                if *predicted != info.engine {
                    strata_node!(
                        warn,
                        step = %node.name,
                        method = %method,
                        predicted = %predicted,
                        resolved = %info.engine,
                        "engine prediction diverged from resolution"
                    );
                }
            }

            let registration = self
                .registry
                .find(&node.component, &info.engine, method)
                .ok_or_else(|| EngineError::Node {
                    step: node.name.clone(),
                    signature: None,
                    source: anyhow::anyhow!(
                        "resolved engine '{}' vanished for {}.{}",
                        info.engine,
                        node.component,
                        method
                    ),
                })?;

            let mut args = MethodArgs::new(resolved.clone());
            if registration.chain_input {
                if let Some(prev) = result.take() {
                    args.primary = Some(prev);
                }
            }

            strata_node!(
                debug,
                step = %node.name,
                method = %method,
                engine = %info.engine,
                "dispatching chain method"
            );
            let value = self
                .registry
                .execute_with_engine(&node.component, &info.engine, method, args)
                .await
                .map_err(|e| EngineError::Node {
                    step: node.name.clone(),
                    signature: None,
                    source: e.into(),
                })?;
            result = Some(value);
        }
        Ok(result.unwrap_or(Value::Null))
    }

    fn complete_node(
        &self,
        node: &NodeConfig,
        value: Value,
        upstream_values: BTreeMap<String, Value>,
        signature: NodeSignature,
        retries: u32,
        start: Instant,
    ) -> NodeOutcome {
        let step = node.name.clone();

        if let Err(err) = self.capture_outputs(node, value) {
            // A capture failure is a node failure: nothing was produced.
            return self.failed_node(
                node,
                err,
                BTreeMap::new(),
                upstream_values,
                signature,
                retries,
                start,
            );
        }

        let fresh = NodeSignature {
            recorded_at: Utc::now(),
            ..signature
        };
        self.signatures.insert(step.clone(), fresh.clone());
        self.statuses.insert(step.clone(), NodeStatus::Completed);
        if let Some(root) = &self.project_root {
            FailureSnapshot::remove(root, &step);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let metrics = NodeMetrics {
            status: NodeStatus::Completed,
            duration_ms,
            cached: false,
            signature: Some(fresh.digest.clone()),
            retries,
            error: None,
            skip_reason: None,
        };
        let lineage = LineageRecord {
            inputs: upstream_values.keys().cloned().collect(),
            outputs: node.outputs.clone(),
            primary_output: node.primary_output.clone(),
            signature: Some(fresh.digest.clone()),
            duration_ms,
            cached: false,
        };

        strata_node!(
            info,
            step = %step,
            duration_ms,
            outputs = node.outputs.len(),
            "node completed"
        );
        self.hooks.emit(HookContext::node(
            HookEvent::AfterNode,
            step.clone(),
            hook_map(&[
                ("signature", Value::from(fresh.digest)),
                ("cached", Value::from(false)),
                ("duration_ms", Value::from(duration_ms as i64)),
            ]),
        ));

        NodeOutcome {
            step,
            metrics,
            lineage: Some(lineage),
            fatal: None,
        }
    }

    /// Stores the chain result under the declared output datasets. One
    /// declared output takes the whole result; several require a map keyed
    /// by the declared names.
    fn capture_outputs(&self, node: &NodeConfig, value: Value) -> Result<(), EngineError> {
        if node.outputs.is_empty() {
            return Ok(());
        }

        let mut produced: Vec<(String, Value)> = Vec::new();
        if node.outputs.len() == 1 {
            produced.push((node.outputs[0].clone(), value));
        } else {
            let map = value.as_map().ok_or_else(|| EngineError::Node {
                step: node.name.clone(),
                signature: None,
                source: anyhow::anyhow!(
                    "step declares {} outputs but the method returned a non-map value",
                    node.outputs.len()
                ),
            })?;
            for (name, dataset) in node.output_names.iter().zip(&node.outputs) {
                let part = map.get(name).ok_or_else(|| EngineError::Node {
                    step: node.name.clone(),
                    signature: None,
                    source: anyhow::anyhow!(
                        "method result is missing declared output '{}'",
                        name
                    ),
                })?;
                produced.push((dataset.clone(), part.clone()));
            }
        }

        let mut written = self.written.lock();
        for (dataset, _) in &produced {
            if !written.insert(dataset.clone()) {
                return Err(EngineError::DuplicateWrite {
                    dataset: dataset.clone(),
                });
            }
        }
        drop(written);

        for (dataset, value) in produced {
            self.catalog.insert(dataset, value);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn failed_node(
        &self,
        node: &NodeConfig,
        err: EngineError,
        resolved: BTreeMap<String, Value>,
        upstream_values: BTreeMap<String, Value>,
        signature: NodeSignature,
        retries: u32,
        start: Instant,
    ) -> NodeOutcome {
        let step = node.name.clone();
        let soft = self.orchestration.soft_fail;
        let status = if soft {
            NodeStatus::SoftFailed
        } else {
            NodeStatus::Failed
        };
        self.statuses.insert(step.clone(), status);

        let duration_ms = start.elapsed().as_millis() as u64;
        let error_text = err.to_string();
        strata_node!(
            error,
            step = %step,
            soft_fail = soft,
            error = %error_text,
            "node failed"
        );

        if let Some(root) = &self.project_root {
            let snapshot = FailureSnapshot {
                step_name: step.clone(),
                error_type: error_type(&err),
                error_message: error_text.clone(),
                traceback: error_chain(&err),
                timestamp: Utc::now().to_rfc3339(),
                parameters: resolved,
                upstream_outputs: upstream_values,
                signature: Some(signature.digest.clone()),
            };
            if let Err(persist_err) = snapshot.write(root) {
                strata_node!(warn, step = %step, error = %persist_err, "failure snapshot not written");
            }
        }

        self.hooks.emit(HookContext::node(
            HookEvent::AfterNode,
            step.clone(),
            hook_map(&[
                ("failed", Value::from(true)),
                ("error", Value::from(error_text.clone())),
            ]),
        ));
        self.hooks.emit(HookContext::node(
            HookEvent::OnFailure,
            step.clone(),
            Value::from(error_text.clone()),
        ));

        let metrics = NodeMetrics {
            status,
            duration_ms,
            cached: false,
            signature: Some(signature.digest.clone()),
            retries,
            error: Some(error_text),
            skip_reason: None,
        };

        let fatal = if soft {
            None
        } else {
            Some(match err {
                EngineError::Node { source, .. } => EngineError::Node {
                    step: step.clone(),
                    signature: Some(signature.digest),
                    source,
                },
                other => other,
            })
        };

        NodeOutcome {
            step,
            metrics,
            lineage: None,
            fatal,
        }
    }

    fn cancelled_outcome(&self, step: &str, start: Instant) -> NodeOutcome {
        self.statuses.insert(step.to_string(), NodeStatus::Cancelled);
        NodeOutcome {
            step: step.to_string(),
            metrics: NodeMetrics {
                status: NodeStatus::Cancelled,
                duration_ms: start.elapsed().as_millis() as u64,
                cached: false,
                signature: None,
                retries: 0,
                error: Some("cancelled".to_string()),
                skip_reason: None,
            },
            lineage: None,
            fatal: Some(EngineError::Cancelled),
        }
    }
}

fn hook_map(pairs: &[(&str, Value)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn error_type(err: &EngineError) -> String {
    match err {
        EngineError::Node { .. } => "NodeExecutionError",
        EngineError::Timeout { .. } => "TimeoutError",
        EngineError::Cancelled => "CancellationError",
        EngineError::CacheIntegrity { .. } => "CacheIntegrityError",
        EngineError::DuplicateWrite { .. } => "DuplicateWriteError",
        EngineError::Registry(_) => "RegistryError",
        EngineError::Persist { .. } => "PersistError",
    }
    .to_string()
}

/// Outermost-first rendering of the error cause chain.
fn error_chain(err: &EngineError) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}
