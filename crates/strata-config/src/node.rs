//! Compiled node configs: one per step, ready for the execution engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{EnginePref, ParamValue, StepSpec};
use strata_registry::MethodHandle;

/// The executable form of a [`StepSpec`]: the step declaration plus one
/// late-binding handle per chain method and the resolved dataset wiring.
pub struct NodeConfig {
    pub name: String,
    pub component: String,
    pub engine: EnginePref,
    pub methods: Vec<String>,
    /// One handle per entry of `methods`, same order.
    pub handles: Vec<Arc<MethodHandle>>,
    pub parameters: BTreeMap<String, ParamValue>,
    /// Dataset keys consumed from upstream steps.
    pub inputs: Vec<String>,
    /// Upstream step names this node reads data from.
    pub upstream_steps: Vec<String>,
    /// Dataset keys this node produces.
    pub outputs: Vec<String>,
    /// The declared short output names, same order as `outputs`. A
    /// multi-output method must return a map keyed by these.
    pub output_names: Vec<String>,
    pub primary_output: Option<String>,
    pub depends_on: Vec<String>,
    pub cache_ttl: Option<Duration>,
}

impl NodeConfig {
    /// Compiles a spec: `engine: auto` defers selection to execution time,
    /// a fixed tag pins every handle in the chain.
    pub fn from_spec(spec: &StepSpec) -> Self {
        let handles = spec
            .methods
            .iter()
            .map(|method| {
                Arc::new(MethodHandle::new(
                    spec.component.clone(),
                    method.clone(),
                    spec.engine.clone(),
                ))
            })
            .collect();
        let outputs = spec.output_datasets();
        Self {
            name: spec.name.clone(),
            component: spec.component.clone(),
            engine: spec.engine.clone(),
            methods: spec.methods.clone(),
            handles,
            parameters: spec.parameters.clone(),
            inputs: spec.input_datasets(),
            upstream_steps: spec.upstream_steps(),
            primary_output: outputs.first().cloned(),
            outputs,
            output_names: spec.outputs.clone(),
            depends_on: spec.depends_on.clone(),
            cache_ttl: spec.cache_ttl,
        }
    }

    /// Literal (non-reference) parameters, for signature computation.
    pub fn literal_parameters(&self) -> BTreeMap<String, strata_core::Value> {
        self.parameters
            .iter()
            .filter_map(|(k, v)| match v {
                ParamValue::Literal(value) => Some((k.clone(), value.clone())),
                ParamValue::Reference(_) => None,
            })
            .collect()
    }

    /// Every predecessor step name: data upstreams plus explicit
    /// `depends_on` entries, deduplicated.
    pub fn predecessor_steps(&self) -> Vec<String> {
        let mut steps = self.upstream_steps.clone();
        for dep in &self.depends_on {
            if !steps.contains(dep) {
                steps.push(dep.clone());
            }
        }
        steps
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("component", &self.component)
            .field("methods", &self.methods)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}
