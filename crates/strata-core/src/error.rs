//! Shared error types for core value and reference handling.
//!
//! Each workspace member defines its own error enum for its concern
//! (configuration, graph, registry, engine); this module only covers the
//! errors core types can produce on their own.

use thiserror::Error;

/// Errors from [`crate::Value`] conversions.
#[derive(Debug, Error)]
pub enum ValueError {
    /// Serialization/deserialization failure.
    #[error("value serialization error: {0}")]
    Serialization(String),
}

/// Errors from parsing the `steps.<step>.outputs.parameters.<name>`
/// reference syntax.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The string is reference-shaped but malformed.
    #[error("malformed step reference '{0}': expected steps.<step>.outputs.parameters.<name>")]
    Malformed(String),
}
