//! Engine error taxonomy.

use strata_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A node's method chain failed; wraps the native error.
    #[error("node '{step}' failed: {source}")]
    Node {
        step: String,
        signature: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// Signature matched but declared outputs were missing from the catalog.
    #[error("cache integrity violation for '{step}': missing outputs {missing:?}")]
    CacheIntegrity { step: String, missing: Vec<String> },

    /// The same dataset was written twice in one run.
    #[error("dataset '{dataset}' written twice in one flow run")]
    DuplicateWrite { dataset: String },

    /// The flow was cancelled by an external signal.
    #[error("flow cancelled")]
    Cancelled,

    /// A node exceeded its wall-clock limit.
    #[error("node '{step}' timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Persisted state (snapshots, signature index) could not be written or
    /// read.
    #[error("persistence failure at '{path}': {message}")]
    Persist { path: String, message: String },
}
