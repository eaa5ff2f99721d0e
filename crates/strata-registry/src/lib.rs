//! Process-wide method registry for the strata orchestrator.
//!
//! Domain plug-ins register callable implementations under
//! `(component, method, engine)` triples; the execution engine asks for one
//! implementation per call through a selection strategy, either directly or
//! via a late-binding [`MethodHandle`] created at configuration time. The
//! crate also hosts the [`HookBus`] lifecycle event channel shared by the
//! registry and the execution engine.

pub mod error;
pub mod handle;
pub mod hooks;
pub mod index;
pub mod metrics;
pub mod plugin;
pub mod registration;
pub mod registry;
pub mod strategy;

pub use error::RegistryError;
pub use handle::{signature_part, HandleOptions, MethodHandle, ResolveExplain};
pub use hooks::{HandlerId, HookBus, HookContext, HookEvent, HookHandler};
pub use index::RegistryIndex;
pub use metrics::{CallMetrics, EngineCallStats};
pub use plugin::{disabled_plugins, MethodPlugin};
pub use registration::{fn_method, ImplementationInfo, Method, MethodArgs, Registration};
pub use registry::{
    ConflictPolicy, ExecuteOptions, InputStyle, Registry, RegistryConfig, RegistryStats,
};
pub use strategy::{resolve_strategy, Strategy};
