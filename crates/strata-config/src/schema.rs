//! Raw serde schema for the pipeline file.
//!
//! YAML or JSON, chosen by file extension. The raw types stay close to the
//! on-disk shape; normalization into [`strata_core::StepSpec`] happens in
//! the service.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_core::{Orchestration, Value};

use crate::error::ConfigError;

/// Top-level document: everything lives under `pipeline`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineFile {
    pub pipeline: PipelineSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    #[serde(default)]
    pub orchestration: Orchestration,
    #[serde(default)]
    pub steps: Vec<RawStep>,
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

/// The method field accepts a single name or an ordered chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodField {
    Single(String),
    Chain(Vec<String>),
}

impl Default for MethodField {
    fn default() -> Self {
        MethodField::Chain(Vec::new())
    }
}

impl MethodField {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            MethodField::Single(name) => vec![name],
            MethodField::Chain(names) => names,
        }
    }
}

/// Declared outputs: `outputs.parameters` is a list of names or
/// `{name: ...}` objects.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawOutputs {
    #[serde(default)]
    pub parameters: Vec<RawOutput>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOutput {
    Name(String),
    Spec { name: String },
}

impl RawOutput {
    pub fn name(&self) -> &str {
        match self {
            RawOutput::Name(name) => name,
            RawOutput::Spec { name } => name,
        }
    }
}

/// The `depends_on` field accepts one name or a list.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsField {
    Single(String),
    Many(Vec<String>),
}

impl Default for DependsField {
    fn default() -> Self {
        DependsField::Many(Vec::new())
    }
}

impl DependsField {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            DependsField::Single(name) => vec![name],
            DependsField::Many(names) => names,
        }
    }
}

/// One step as declared in the file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawStep {
    pub name: String,
    pub component: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub method: MethodField,
    #[serde(default)]
    pub parameters: std::collections::BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: Option<RawOutputs>,
    #[serde(default)]
    pub depends_on: DependsField,
    /// Per-step cache TTL in seconds.
    #[serde(default)]
    pub cache_ttl: Option<u64>,
}

impl PipelineFile {
    /// Loads a pipeline file, parsing YAML unless the extension says JSON.
    pub fn from_path(path: &Path) -> Result<PipelineFile, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        } else {
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        }
    }

    /// Parses from a YAML string (tests and embedded configs).
    pub fn from_yaml(raw: &str) -> Result<PipelineFile, ConfigError> {
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Granularity, TaskRunner};

    const SAMPLE: &str = r#"
pipeline:
  name: demo
  orchestration:
    task_runner: concurrent
    max_workers: 4
    soft_fail: true
  steps:
    - name: load
      component: table
      engine: mem
      method: load
      parameters:
        path: in.csv
      outputs:
        parameters:
          - raw
    - name: clean
      component: table
      engine: auto
      method: [clean, validate]
      parameters:
        df: steps.load.outputs.parameters.raw
      depends_on: load
"#;

    #[test]
    fn parses_sample_yaml() {
        let file = PipelineFile::from_yaml(SAMPLE).unwrap();
        let p = &file.pipeline;
        assert_eq!(p.name, "demo");
        assert_eq!(p.orchestration.task_runner, TaskRunner::Concurrent);
        assert_eq!(p.orchestration.max_workers, 4);
        assert!(p.orchestration.soft_fail);
        assert_eq!(p.orchestration.granularity, Granularity::Node);
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].method.clone().into_vec(), vec!["load"]);
        assert_eq!(
            p.steps[1].method.clone().into_vec(),
            vec!["clean", "validate"]
        );
        assert_eq!(p.steps[1].depends_on.clone().into_vec(), vec!["load"]);
        let outs = p.steps[0].outputs.as_ref().unwrap();
        assert_eq!(outs.parameters[0].name(), "raw");
    }

    #[test]
    fn orchestration_defaults() {
        let file = PipelineFile::from_yaml(
            "pipeline:\n  steps:\n    - name: a\n      component: c\n      method: m\n",
        )
        .unwrap();
        let orch = &file.pipeline.orchestration;
        assert_eq!(orch.task_runner, TaskRunner::Sequential);
        assert_eq!(orch.max_workers, 1);
        assert!(!orch.soft_fail);
        assert_eq!(orch.retry_count, 0);
        assert_eq!(orch.timeout, None);
    }

    #[test]
    fn json_configs_parse_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(
            &path,
            r#"{"pipeline": {"steps": [{"name": "a", "component": "c", "method": "m"}]}}"#,
        )
        .unwrap();
        let file = PipelineFile::from_path(&path).unwrap();
        assert_eq!(file.pipeline.steps[0].name, "a");
    }
}
