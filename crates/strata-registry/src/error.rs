//! Registry error taxonomy.

use thiserror::Error;

/// Errors raised by registration, selection, and dispatch.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No registration exists for the component/method pair.
    #[error("method not found: {component}.{method}")]
    MethodNotFound { component: String, method: String },

    /// A fixed-engine dispatch named an engine with no registration.
    #[error("engine '{engine}' not registered for {component}.{method}")]
    EngineNotFound {
        component: String,
        engine: String,
        method: String,
    },

    /// A strategy was given candidates but selected none.
    #[error("no selectable implementation for {component}.{method}")]
    NoCandidate { component: String, method: String },

    /// Same full key registered twice under the `reject` conflict policy.
    #[error("duplicate registration: {full_key}")]
    DuplicateRegistration { full_key: String },

    /// Strategy name not recognized, or `engine_override` without a tag.
    #[error("unknown selection strategy '{name}'")]
    UnknownStrategy { name: String },

    /// Input-style validation failure (ORCH_INPUT_STYLE).
    #[error("input style violation for {full_key}: {message}")]
    InputStyle { full_key: String, message: String },

    /// The method body failed; the native error is preserved.
    #[error("method execution failed: {full_key}")]
    Execution {
        full_key: String,
        #[source]
        source: anyhow::Error,
    },
}
