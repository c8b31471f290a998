//! Reference inference engine
//!
//! The engine shipped with the `inferd` binary. It performs the checks a real
//! engine binding makes before loading weights (model directory present,
//! requested device present on this host) and answers prompts with a
//! deterministic, structured completion. Swap in a real binding by
//! implementing [`InferenceEngine`].

use crate::engine::{InferenceEngine, Pipeline};
use crate::env::{PerformanceConfig, ProcessEnvironment};
use crate::error::EngineError;
use crate::priority::resolve_str;
use async_trait::async_trait;
use inferd_hardware::{BackendKind, Capabilities};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Capability-gated engine used when no native binding is linked.
pub struct ReferenceEngine {
    available: BTreeSet<BackendKind>,
    env: ProcessEnvironment,
    priority_key: String,
    thread_count_key: String,
}

impl ReferenceEngine {
    pub fn new(
        capabilities: &Capabilities,
        env: ProcessEnvironment,
        performance: &PerformanceConfig,
    ) -> Self {
        Self {
            available: capabilities.available_backends.clone(),
            env,
            priority_key: performance.priority_key.clone(),
            thread_count_key: performance.thread_count_key.clone(),
        }
    }

    fn resolve_devices(&self, backend: &BackendKind) -> Result<Vec<BackendKind>, EngineError> {
        if *backend != BackendKind::Mixed {
            if !self.available.contains(backend) {
                return Err(EngineError::BackendUnavailable {
                    backend: backend.clone(),
                    reason: "no matching device was detected on this host".to_string(),
                });
            }
            return Ok(vec![backend.clone()]);
        }

        let hint = self.env.get(&self.priority_key).ok_or_else(|| {
            EngineError::InitFailed(format!(
                "MIXED target requires a device priority in {}",
                self.priority_key
            ))
        })?;
        let priority = resolve_str(&hint).map_err(|e| EngineError::InitFailed(e.to_string()))?;
        let devices: Vec<BackendKind> = priority
            .iter()
            .filter(|b| **b != BackendKind::Mixed && self.available.contains(*b))
            .cloned()
            .collect();

        if devices.is_empty() {
            return Err(EngineError::BackendUnavailable {
                backend: BackendKind::Mixed,
                reason: format!("none of [{hint}] is present on this host"),
            });
        }
        Ok(devices)
    }
}

#[async_trait]
impl InferenceEngine for ReferenceEngine {
    fn name(&self) -> &str {
        "reference"
    }

    async fn initialize(
        &self,
        model_dir: &Path,
        backend: &BackendKind,
    ) -> Result<Arc<dyn Pipeline>, EngineError> {
        if !model_dir.is_dir() {
            return Err(EngineError::ModelNotFound(model_dir.display().to_string()));
        }
        let devices = self.resolve_devices(backend)?;

        let threads = self
            .env
            .get(&self.thread_count_key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let model_name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_dir.display().to_string());

        tracing::debug!(
            model = %model_name,
            backend = %backend,
            devices = ?devices,
            threads,
            "reference pipeline initialised"
        );

        Ok(Arc::new(ReferencePipeline {
            model_name,
            devices,
            threads,
        }))
    }
}

struct ReferencePipeline {
    model_name: String,
    devices: Vec<BackendKind>,
    threads: usize,
}

#[async_trait]
impl Pipeline for ReferencePipeline {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, EngineError> {
        if max_tokens == 0 {
            return Err(EngineError::GenerationFailed(
                "max_tokens must be positive".to_string(),
            ));
        }
        let devices = self
            .devices
            .iter()
            .map(BackendKind::as_str)
            .collect::<Vec<_>>()
            .join("+");
        let echoed: Vec<&str> = prompt.split_whitespace().take(max_tokens).collect();

        Ok(format!(
            "[{devices} backend] model={} threads={} input_tokens={} max_tokens={} :: {}",
            self.model_name,
            self.threads,
            prompt.split_whitespace().count(),
            max_tokens,
            echoed.join(" "),
        ))
    }

    fn is_reentrant(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(backends: &[BackendKind]) -> Capabilities {
        let mut caps = Capabilities::cpu_only();
        caps.available_backends.extend(backends.iter().cloned());
        caps
    }

    fn engine(backends: &[BackendKind]) -> (ReferenceEngine, ProcessEnvironment) {
        let env = ProcessEnvironment::new();
        let engine = ReferenceEngine::new(&caps(backends), env.clone(), &PerformanceConfig::default());
        (engine, env)
    }

    #[tokio::test]
    async fn test_missing_model_dir() {
        let (engine, _) = engine(&[]);
        let err = engine
            .initialize(Path::new("/definitely/not/here"), &BackendKind::Cpu)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_undetected_backend_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(&[]);
        let err = engine
            .initialize(dir.path(), &BackendKind::Npu)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EngineError::BackendUnavailable { backend: BackendKind::Npu, .. }
        ));
        assert!(engine.initialize(dir.path(), &BackendKind::Cpu).await.is_ok());
    }

    #[tokio::test]
    async fn test_mixed_uses_hinted_devices_present_on_host() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, env) = engine(&[BackendKind::Gpu]);

        assert!(engine.initialize(dir.path(), &BackendKind::Mixed).await.is_err());

        env.set("INFERD_DEVICE_PRIORITIES", "NPU,GPU,CPU").unwrap();
        let pipeline = engine
            .initialize(dir.path(), &BackendKind::Mixed)
            .await
            .unwrap();
        let text = pipeline.generate("hello there", 16).await.unwrap();
        assert!(text.starts_with("[GPU+CPU backend]"), "{text}");

        env.set("INFERD_DEVICE_PRIORITIES", "NPU").unwrap();
        assert!(engine.initialize(dir.path(), &BackendKind::Mixed).await.is_err());
    }

    #[tokio::test]
    async fn test_generation_truncates_to_max_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, env) = engine(&[]);
        env.set("OMP_NUM_THREADS", "8").unwrap();
        let pipeline = engine.initialize(dir.path(), &BackendKind::Cpu).await.unwrap();

        let text = pipeline.generate("one two three four", 2).await.unwrap();
        assert!(text.contains("threads=8"));
        assert!(text.contains("input_tokens=4"));
        assert!(text.ends_with(":: one two"));
        assert!(pipeline.generate("x", 0).await.is_err());
    }
}
