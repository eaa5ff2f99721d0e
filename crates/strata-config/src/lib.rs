//! Configuration layer: turns a pipeline file into a validated dependency
//! graph and an ordered list of executable node configs.

pub mod error;
pub mod node;
pub mod schema;
pub mod service;

pub use error::ConfigError;
pub use node::NodeConfig;
pub use schema::{PipelineFile, RawOutputs, RawStep};
pub use service::{CompiledPipeline, ConfigService};
