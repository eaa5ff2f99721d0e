//! Project-relative paths for persisted orchestrator state.

use std::path::{Path, PathBuf};

/// Root of persisted pipeline state under a project directory.
pub fn pipeline_dir(project_root: &Path) -> PathBuf {
    project_root.join(".pipeline")
}

/// Directory holding per-step failure snapshots.
pub fn failures_dir(project_root: &Path) -> PathBuf {
    pipeline_dir(project_root).join("failures")
}

/// Directory holding cache state.
pub fn cache_dir(project_root: &Path) -> PathBuf {
    pipeline_dir(project_root).join("cache")
}

/// The persisted signature index, step name -> signature record.
pub fn signature_index(project_root: &Path) -> PathBuf {
    cache_dir(project_root).join("signatures.db")
}

/// The persisted dataset values, dataset key -> value. Read on resume to
/// replay prior successful steps' outputs.
pub fn output_index(project_root: &Path) -> PathBuf {
    cache_dir(project_root).join("outputs.db")
}

/// Snapshot file for one failed step.
pub fn failure_snapshot(project_root: &Path, step: &str) -> PathBuf {
    failures_dir(project_root).join(format!("{}.json", step))
}

/// The persisted report of the most recent run.
pub fn last_run_report(project_root: &Path) -> PathBuf {
    pipeline_dir(project_root).join("last_run.json")
}

/// Opt-out file listing plugins to skip, one name per line or
/// comma-separated.
pub fn disable_plugins_file(project_root: &Path) -> PathBuf {
    project_root.join(".pipeline_disable_plugins")
}
