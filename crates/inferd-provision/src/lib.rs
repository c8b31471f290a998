//! Backend selection and pipeline provisioning for inferd
//!
//! - [`priority`]: turns a free-text backend list into an ordered, deduplicated
//!   [`BackendPriority`]
//! - [`provisioner`]: sequential fallback or a composed `MIXED` target, with
//!   per-model single-flight caching
//! - [`engine`]: the contract an inference engine binding implements
//! - [`reference`]: the engine shipped with the `inferd` binary
//! - [`env`]: the key/value store engines read performance hints from

pub mod cache;
pub mod engine;
pub mod env;
pub mod error;
pub mod priority;
pub mod provisioner;
pub mod reference;

pub use cache::{LivePipeline, PipelineCache};
pub use engine::{InferenceEngine, Pipeline};
pub use env::{PerformanceConfig, ProcessEnvironment};
pub use error::{BackendAttempt, ConfigError, EngineError, EnvError, ProvisionError};
pub use priority::{BackendPriority, resolve, resolve_str};
pub use provisioner::{
    InvocationPolicy, ProvisionState, ProvisionStrategy, Provisioner, ProvisionerConfig,
    ProvisionerStatus, RECENT_FAILURES,
};
pub use reference::ReferenceEngine;
