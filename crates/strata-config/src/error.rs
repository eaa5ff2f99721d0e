//! Configuration errors. Everything here is fatal before execution starts.

use strata_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {message}")]
    Parse { path: String, message: String },

    /// Structural problem, with the offending step when known.
    #[error("invalid configuration{suffix}: {message}", suffix = step_suffix(.step))]
    Structure {
        step: Option<String>,
        message: String,
    },

    #[error("duplicate step name '{name}'")]
    DuplicateStep { name: String },

    #[error("step '{step}' declares no methods")]
    EmptyMethods { step: String },

    /// A parameter references a step or output that does not exist.
    #[error("step '{step}' references unknown step '{missing}'")]
    UnknownReference { step: String, missing: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn step_suffix(step: &Option<String>) -> String {
    match step {
        Some(name) => format!(" (step '{}')", name),
        None => String::new(),
    }
}
