//! The configuration service: file -> validated graph -> executable nodes.
//!
//! Flow: parse the raw document, normalize each step, scan every parameter
//! for cross-step references (auto-declaring referenced outputs the
//! upstream step forgot), assemble the dependency graph, compute the
//! layered plan, and compile node configs in topological order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{EnginePref, Orchestration, ParamValue, Reference, StepSpec, Value};
use strata_graph::{DependencyGraph, ExecutionPlan, GraphNode};

use crate::error::ConfigError;
use crate::node::NodeConfig;
use crate::schema::PipelineFile;

/// Everything the engine needs to run one flow.
#[derive(Debug)]
pub struct CompiledPipeline {
    pub name: String,
    pub orchestration: Orchestration,
    pub specs: BTreeMap<String, StepSpec>,
    pub graph: DependencyGraph,
    pub plan: ExecutionPlan,
    /// Node configs in topological order.
    pub nodes: Vec<Arc<NodeConfig>>,
}

impl CompiledPipeline {
    pub fn node(&self, name: &str) -> Option<&Arc<NodeConfig>> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Stateless compiler from pipeline files to [`CompiledPipeline`]s.
pub struct ConfigService;

impl ConfigService {
    /// Loads and compiles a pipeline file.
    pub fn load(path: &Path) -> Result<CompiledPipeline, ConfigError> {
        let file = PipelineFile::from_path(path)?;
        Self::compile(file)
    }

    /// Compiles an already-parsed document.
    pub fn compile(file: PipelineFile) -> Result<CompiledPipeline, ConfigError> {
        Self::compile_filtered(file, None, &[])
    }

    /// Compiles with optional step filters (`--only` / `--exclude`). The
    /// graph and plan are rebuilt over the surviving steps; references into
    /// removed steps surface as unknown references.
    pub fn compile_filtered(
        file: PipelineFile,
        only: Option<&[String]>,
        exclude: &[String],
    ) -> Result<CompiledPipeline, ConfigError> {
        let pipeline = file.pipeline;
        if pipeline.steps.is_empty() {
            return Err(ConfigError::Structure {
                step: None,
                message: "pipeline.steps must contain at least one step".to_string(),
            });
        }

        let mut specs = Self::parse_steps(&pipeline.steps)?;
        if let Some(only) = only {
            let keep: BTreeSet<&str> = only.iter().map(String::as_str).collect();
            specs.retain(|name, _| keep.contains(name.as_str()));
        }
        if !exclude.is_empty() {
            let drop: BTreeSet<&str> = exclude.iter().map(String::as_str).collect();
            specs.retain(|name, _| !drop.contains(name.as_str()));
        }
        if specs.is_empty() {
            return Err(ConfigError::Structure {
                step: None,
                message: "step filters removed every step".to_string(),
            });
        }

        Self::scan_references(&mut specs)?;
        let graph = Self::build_dependency_graph(&specs)?;
        let plan = graph.build_execution_plan()?;
        let nodes = Self::build_auto_nodes(&specs, &plan);

        tracing::info!(
            target: "strata::config",
            pipeline = %pipeline.name,
            steps = specs.len(),
            layers = plan.depth(),
            max_parallelism = plan.max_parallelism(),
            "pipeline compiled"
        );

        Ok(CompiledPipeline {
            name: pipeline.name,
            orchestration: pipeline.orchestration,
            specs,
            graph,
            plan,
            nodes,
        })
    }

    /// Normalizes raw steps into [`StepSpec`]s: method chains become
    /// non-empty lists, parameters are classified literal vs. reference,
    /// duplicate names are rejected.
    fn parse_steps(
        raw_steps: &[crate::schema::RawStep],
    ) -> Result<BTreeMap<String, StepSpec>, ConfigError> {
        let mut specs = BTreeMap::new();
        for raw in raw_steps {
            if raw.name.trim().is_empty() {
                return Err(ConfigError::Structure {
                    step: None,
                    message: "step name must be non-empty".to_string(),
                });
            }
            let methods = raw.method.clone().into_vec();
            if methods.is_empty() {
                return Err(ConfigError::EmptyMethods {
                    step: raw.name.clone(),
                });
            }

            let mut parameters = BTreeMap::new();
            for (key, value) in &raw.parameters {
                let classified = Self::classify_param(&raw.name, value)?;
                parameters.insert(key.clone(), classified);
            }

            let outputs = raw
                .outputs
                .as_ref()
                .map(|outs| {
                    outs.parameters
                        .iter()
                        .map(|o| o.name().to_string())
                        .collect()
                })
                .unwrap_or_default();

            let spec = StepSpec {
                name: raw.name.clone(),
                component: raw.component.clone(),
                engine: EnginePref::from_tag(raw.engine.as_deref().unwrap_or("auto")),
                methods,
                parameters,
                outputs,
                depends_on: raw.depends_on.clone().into_vec(),
                cache_ttl: raw.cache_ttl.map(Duration::from_secs),
            };
            if specs.insert(spec.name.clone(), spec).is_some() {
                return Err(ConfigError::DuplicateStep {
                    name: raw.name.clone(),
                });
            }
        }
        Ok(specs)
    }

    /// Classifies one parameter value, recursing into lists and maps so
    /// nested references are found. A container holding any reference stays
    /// a container of literals except for the reference leaves, which the
    /// engine resolves; only top-level strings/tagged objects become
    /// `ParamValue::Reference` — nested references are rejected to keep
    /// resolution unambiguous.
    fn classify_param(step: &str, value: &Value) -> Result<ParamValue, ConfigError> {
        let classified =
            ParamValue::classify(value.clone()).map_err(|e| ConfigError::Structure {
                step: Some(step.to_string()),
                message: e.to_string(),
            })?;
        if classified.as_reference().is_some() {
            return Ok(classified);
        }
        // Reject references buried inside containers: they would silently
        // pass through as literal strings.
        if let Some(found) = Self::find_nested_reference(value) {
            return Err(ConfigError::Structure {
                step: Some(step.to_string()),
                message: format!(
                    "reference '{}' must be the whole parameter value, not nested \
                     inside a list or map",
                    found
                ),
            });
        }
        Ok(classified)
    }

    // Only invoked on values already classified as literals, so a matching
    // string here is necessarily buried in a container.
    fn find_nested_reference(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Reference::parse(s)
                .ok()
                .flatten()
                .map(|r| r.to_string()),
            Value::List(items) => items.iter().find_map(Self::find_nested_reference),
            Value::Map(map) => map.values().find_map(Self::find_nested_reference),
            _ => None,
        }
    }

    /// Validates every reference and auto-declares referenced outputs the
    /// upstream step left implicit.
    fn scan_references(specs: &mut BTreeMap<String, StepSpec>) -> Result<(), ConfigError> {
        let known: BTreeSet<String> = specs.keys().cloned().collect();
        let mut referenced: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for spec in specs.values() {
            for value in spec.parameters.values() {
                if let ParamValue::Reference(r) = value {
                    if !known.contains(&r.step) {
                        return Err(ConfigError::UnknownReference {
                            step: spec.name.clone(),
                            missing: r.step.clone(),
                        });
                    }
                    referenced
                        .entry(r.step.clone())
                        .or_default()
                        .insert(r.output.clone());
                }
            }
            for dep in &spec.depends_on {
                if !known.contains(dep) {
                    return Err(ConfigError::UnknownReference {
                        step: spec.name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        for (step, outputs) in referenced {
            let spec = specs.get_mut(&step).expect("validated above");
            let missing: Vec<String> = outputs
                .into_iter()
                .filter(|o| !spec.outputs.contains(o))
                .collect();
            if !missing.is_empty() {
                tracing::info!(
                    target: "strata::config",
                    step = %step,
                    outputs = ?missing,
                    "auto-declared outputs referenced downstream"
                );
                spec.outputs.extend(missing);
            }
        }
        Ok(())
    }

    /// Assembles the typed graph from the step specs.
    fn build_dependency_graph(
        specs: &BTreeMap<String, StepSpec>,
    ) -> Result<DependencyGraph, ConfigError> {
        let nodes: BTreeMap<String, GraphNode> = specs
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    GraphNode {
                        inputs: spec.input_datasets(),
                        outputs: spec.output_datasets(),
                        depends_on: spec.depends_on.clone(),
                    },
                )
            })
            .collect();
        Ok(DependencyGraph::from_nodes(&nodes)?)
    }

    /// Compiles node configs in plan order.
    fn build_auto_nodes(
        specs: &BTreeMap<String, StepSpec>,
        plan: &ExecutionPlan,
    ) -> Vec<Arc<NodeConfig>> {
        plan.flatten()
            .iter()
            .filter_map(|name| specs.get(name))
            .map(|spec| Arc::new(NodeConfig::from_spec(spec)))
            .collect()
    }
}
