//! Step and orchestration declarations.
//!
//! A [`StepSpec`] is the normalized form of one entry under
//! `pipeline.steps`; [`Orchestration`] carries the flow-level execution
//! directives. Both are produced by the configuration layer and consumed by
//! the graph builder and the execution engine.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reference::{dataset_name, ParamValue};

/// Engine preference for a step: defer selection to the registry, or pin a
/// concrete engine tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnginePref {
    Auto,
    Fixed(String),
}

impl EnginePref {
    pub fn from_tag(tag: &str) -> Self {
        if tag.is_empty() || tag.eq_ignore_ascii_case("auto") {
            EnginePref::Auto
        } else {
            EnginePref::Fixed(tag.to_string())
        }
    }

    pub fn fixed_engine(&self) -> Option<&str> {
        match self {
            EnginePref::Fixed(tag) => Some(tag),
            EnginePref::Auto => None,
        }
    }
}

/// One normalized step from the configuration.
#[derive(Clone, Debug)]
pub struct StepSpec {
    pub name: String,
    pub component: String,
    pub engine: EnginePref,
    /// Method chain, never empty. Single-method steps are a one-element
    /// chain.
    pub methods: Vec<String>,
    pub parameters: BTreeMap<String, ParamValue>,
    /// Declared output names (auto-filled when downstream steps reference
    /// outputs the step did not declare).
    pub outputs: Vec<String>,
    pub depends_on: Vec<String>,
    /// Optional per-step cache TTL.
    pub cache_ttl: Option<Duration>,
}

impl StepSpec {
    /// Catalog keys for every declared output.
    pub fn output_datasets(&self) -> Vec<String> {
        self.outputs
            .iter()
            .map(|o| dataset_name(&self.name, o))
            .collect()
    }

    /// Catalog keys for every referenced upstream output, deduplicated in
    /// first-seen order.
    pub fn input_datasets(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for value in self.parameters.values() {
            if let ParamValue::Reference(r) = value {
                let ds = r.dataset();
                if !seen.contains(&ds) {
                    seen.push(ds);
                }
            }
        }
        seen
    }

    /// Names of upstream steps this step reads data from.
    pub fn upstream_steps(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for value in self.parameters.values() {
            if let ParamValue::Reference(r) = value {
                if !seen.contains(&r.step) {
                    seen.push(r.step.clone());
                }
            }
        }
        seen
    }
}

/// Scheduling granularity. `Node` runs each step as its own task; `Pipeline`
/// treats the whole flow as one unit (no intra-flow parallelism).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Node,
    Pipeline,
}

/// Task runner selection for intra-layer scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunner {
    #[default]
    Sequential,
    Concurrent,
}

/// Flow-level orchestration directives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Orchestration {
    pub granularity: Granularity,
    pub task_runner: TaskRunner,
    pub max_workers: usize,
    pub soft_fail: bool,
    pub retry_count: u32,
    /// Delay between retries, in seconds.
    pub retry_delay: u64,
    /// Per-node wall-clock timeout, in seconds.
    pub timeout: Option<u64>,
}

impl Default for Orchestration {
    fn default() -> Self {
        Self {
            granularity: Granularity::Node,
            task_runner: TaskRunner::Sequential,
            max_workers: 1,
            soft_fail: false,
            retry_count: 0,
            retry_delay: 0,
            timeout: None,
        }
    }
}

impl Orchestration {
    /// Effective worker-pool width: the sequential runner always runs one
    /// node at a time regardless of `max_workers`.
    pub fn effective_workers(&self) -> usize {
        match self.task_runner {
            TaskRunner::Sequential => 1,
            TaskRunner::Concurrent => self.max_workers.max(1),
        }
    }

    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;
    use crate::value::Value;

    fn spec_with_ref() -> StepSpec {
        let mut params = BTreeMap::new();
        params.insert(
            "df".to_string(),
            ParamValue::Reference(Reference::new("load", "raw")),
        );
        params.insert("n".to_string(), ParamValue::Literal(Value::from(3)));
        StepSpec {
            name: "clean".to_string(),
            component: "table".to_string(),
            engine: EnginePref::Auto,
            methods: vec!["clean".to_string()],
            parameters: params,
            outputs: vec!["cleaned".to_string()],
            depends_on: vec![],
            cache_ttl: None,
        }
    }

    #[test]
    fn datasets_derive_from_declarations() {
        let spec = spec_with_ref();
        assert_eq!(spec.output_datasets(), vec!["clean__cleaned"]);
        assert_eq!(spec.input_datasets(), vec!["load__raw"]);
        assert_eq!(spec.upstream_steps(), vec!["load"]);
    }

    #[test]
    fn engine_pref_parsing() {
        assert_eq!(EnginePref::from_tag("auto"), EnginePref::Auto);
        assert_eq!(EnginePref::from_tag(""), EnginePref::Auto);
        assert_eq!(
            EnginePref::from_tag("duckdb"),
            EnginePref::Fixed("duckdb".to_string())
        );
    }

    #[test]
    fn sequential_runner_pins_one_worker() {
        let orch = Orchestration {
            task_runner: TaskRunner::Sequential,
            max_workers: 8,
            ..Default::default()
        };
        assert_eq!(orch.effective_workers(), 1);
        let orch = Orchestration {
            task_runner: TaskRunner::Concurrent,
            max_workers: 8,
            ..Default::default()
        };
        assert_eq!(orch.effective_workers(), 8);
    }
}
