//! Persisted state: failure snapshots, the signature index, and the output
//! index.
//!
//! Snapshots are one JSON file per failed step under `.pipeline/failures/`,
//! carrying enough context (parameters, upstream outputs) for `run --resume`
//! to re-execute the failed subtree. The signature index at
//! `.pipeline/cache/signatures.db` is a flat JSON map, step name ->
//! signature record; the output index at `.pipeline/cache/outputs.db` holds
//! the dataset values behind those signatures, so a resume can replay every
//! prior successful step's outputs — not just the direct inputs of whatever
//! failed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_core::{paths, Value};

use crate::error::EngineError;
use crate::signature::NodeSignature;

/// Snapshot written when a node fails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureSnapshot {
    pub step_name: String,
    pub error_type: String,
    pub error_message: String,
    /// Abbreviated cause chain, outermost first.
    pub traceback: Vec<String>,
    pub timestamp: String,
    /// Literal parameters at failure time.
    pub parameters: BTreeMap<String, Value>,
    /// Resolved upstream datasets, for resume seeding.
    pub upstream_outputs: BTreeMap<String, Value>,
    pub signature: Option<String>,
}

impl FailureSnapshot {
    pub fn write(&self, project_root: &Path) -> Result<PathBuf, EngineError> {
        let dir = paths::failures_dir(project_root);
        std::fs::create_dir_all(&dir).map_err(|e| persist_err(&dir, e))?;
        let path = paths::failure_snapshot(project_root, &self.step_name);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Persist {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        std::fs::write(&path, json).map_err(|e| persist_err(&path, e))?;
        Ok(path)
    }

    /// Loads every snapshot under the failures directory. A missing
    /// directory is an empty set.
    pub fn load_all(project_root: &Path) -> Result<Vec<FailureSnapshot>, EngineError> {
        let dir = paths::failures_dir(project_root);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let raw = std::fs::read_to_string(&path).map_err(|e| persist_err(&path, e))?;
                let snap: FailureSnapshot =
                    serde_json::from_str(&raw).map_err(|e| EngineError::Persist {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?;
                snapshots.push(snap);
            }
        }
        snapshots.sort_by(|a, b| a.step_name.cmp(&b.step_name));
        Ok(snapshots)
    }

    /// Removes one step's snapshot, if present.
    pub fn remove(project_root: &Path, step: &str) {
        let _ = std::fs::remove_file(paths::failure_snapshot(project_root, step));
    }
}

fn persist_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Persist {
        path: path.display().to_string(),
        message: source.to_string(),
    }
}

/// The on-disk signature index.
#[derive(Debug, Default)]
pub struct SignatureStore {
    entries: BTreeMap<String, NodeSignature>,
}

impl SignatureStore {
    /// Loads the index; a missing file is an empty store.
    pub fn load(project_root: &Path) -> Result<Self, EngineError> {
        let path = paths::signature_index(project_root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let entries = serde_json::from_str(&raw).map_err(|e| EngineError::Persist {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                Ok(Self { entries })
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn save(&self, project_root: &Path) -> Result<(), EngineError> {
        let dir = paths::cache_dir(project_root);
        std::fs::create_dir_all(&dir).map_err(|e| persist_err(&dir, e))?;
        let path = paths::signature_index(project_root);
        let json =
            serde_json::to_string_pretty(&self.entries).map_err(|e| EngineError::Persist {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        std::fs::write(&path, json).map_err(|e| persist_err(&path, e))
    }

    pub fn get(&self, step: &str) -> Option<&NodeSignature> {
        self.entries.get(step)
    }

    pub fn insert(&mut self, step: impl Into<String>, signature: NodeSignature) {
        self.entries.insert(step.into(), signature);
    }

    pub fn remove(&mut self, step: &str) -> bool {
        self.entries.remove(step).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn steps(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The on-disk dataset values, keyed like the catalog (`step__output`).
/// A trusted step on resume is only skipped when every one of its declared
/// outputs can be re-seeded from here.
#[derive(Debug, Default)]
pub struct OutputStore {
    entries: BTreeMap<String, Value>,
}

impl OutputStore {
    /// Loads the index; a missing file is an empty store.
    pub fn load(project_root: &Path) -> Result<Self, EngineError> {
        let path = paths::output_index(project_root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let entries = serde_json::from_str(&raw).map_err(|e| EngineError::Persist {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                Ok(Self { entries })
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn save(&self, project_root: &Path) -> Result<(), EngineError> {
        let dir = paths::cache_dir(project_root);
        std::fs::create_dir_all(&dir).map_err(|e| persist_err(&dir, e))?;
        let path = paths::output_index(project_root);
        let json =
            serde_json::to_string_pretty(&self.entries).map_err(|e| EngineError::Persist {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        std::fs::write(&path, json).map_err(|e| persist_err(&path, e))
    }

    pub fn get(&self, dataset: &str) -> Option<&Value> {
        self.entries.get(dataset)
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.entries.contains_key(dataset)
    }

    pub fn insert(&mut self, dataset: impl Into<String>, value: Value) {
        self.entries.insert(dataset.into(), value);
    }

    pub fn remove(&mut self, dataset: &str) -> bool {
        self.entries.remove(dataset).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
