//! Graph construction and validation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    /// The declared edges contain a cycle; the path lists each node once
    /// plus the closing repeat.
    #[error("cyclic dependency detected: {path}", path = .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// A node depends on a step that does not exist.
    #[error("node '{node}' references unknown step '{missing}'")]
    UnknownReference { node: String, missing: String },
}
