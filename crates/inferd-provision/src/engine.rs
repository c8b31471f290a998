//! Inference engine contract
//!
//! The provisioner treats the text-generation engine as an opaque
//! capability: it can be asked to initialise a pipeline for a model directory
//! on one backend, and an initialised pipeline can generate text.

use crate::error::EngineError;
use async_trait::async_trait;
use inferd_hardware::BackendKind;
use std::path::Path;
use std::sync::Arc;

/// An initialised text-generation pipeline bound to one model and backend.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Generate a completion of at most `max_tokens` new tokens.
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, EngineError>;

    /// Whether `generate` may run concurrently on this instance. Engines
    /// that are not reentrant return `false` and calls are serialised.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Binds models to compute backends.
///
/// For [`BackendKind::Mixed`] the engine distributes work across the backends
/// listed in the priority hint it reads from the
/// [`ProcessEnvironment`](crate::env::ProcessEnvironment).
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Load the model in `model_dir` onto `backend`.
    ///
    /// # Errors
    /// Any [`EngineError`]; the provisioner treats it as a failure of this
    /// backend only.
    async fn initialize(
        &self,
        model_dir: &Path,
        backend: &BackendKind,
    ) -> Result<Arc<dyn Pipeline>, EngineError>;
}
