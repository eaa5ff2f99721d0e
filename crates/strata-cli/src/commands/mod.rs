pub mod cache;
pub mod engines;
pub mod graph;
pub mod metrics;
pub mod run;
pub mod status;

use std::path::Path;

use colored::Colorize;
use strata_config::{CompiledPipeline, ConfigService, PipelineFile};

/// Exit code for configuration and graph errors.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code for runtime failures.
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_OK: u8 = 0;

/// Loads and compiles a pipeline, printing the error on failure.
pub fn load_pipeline(
    config: &Path,
    only: Option<&str>,
    exclude: Option<&str>,
) -> Result<CompiledPipeline, u8> {
    let file = match PipelineFile::from_path(config) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("{} {}", "config error:".red().bold(), err);
            return Err(EXIT_CONFIG);
        }
    };
    let only_list = only.map(split_names);
    let exclude_list = exclude.map(split_names).unwrap_or_default();
    ConfigService::compile_filtered(file, only_list.as_deref(), &exclude_list).map_err(|err| {
        eprintln!("{} {}", "config error:".red().bold(), err);
        EXIT_CONFIG
    })
}

pub fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// The project root for persisted `.pipeline/` state: the working
/// directory, as with the flow runner itself.
pub fn project_root() -> std::path::PathBuf {
    std::env::current_dir().unwrap_or_else(|_| ".".into())
}
