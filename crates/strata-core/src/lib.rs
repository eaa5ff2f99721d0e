//! Core types for the strata workflow orchestrator.
//!
//! This crate holds everything the other members share: the unified [`Value`]
//! representation that flows between steps, the `steps.<step>.outputs.
//! parameters.<name>` reference syntax, step and orchestration declarations,
//! lenient semver parsing for implementation selection, and the tracing
//! macros used across the workspace.

pub mod error;
pub mod logging;
pub mod paths;
pub mod reference;
pub mod step;
pub mod value;
pub mod version;

pub use error::{ReferenceError, ValueError};
pub use reference::{collect_references, dataset_name, ParamValue, Reference};
pub use step::{EnginePref, Granularity, Orchestration, StepSpec, TaskRunner};
pub use value::{Number, Value};
pub use version::Version;
