//! Pipeline cache with single-flight initialisation
//!
//! Maps a canonical model path to its live pipeline. The first caller for a
//! key spawns the initialisation task and parks a shared future in the slot;
//! every concurrent caller for the same key awaits that same future and gets
//! the same pipeline, or the same failure. A failed slot is cleared so a
//! later request can try again. Different keys never wait on each other.

use crate::engine::Pipeline;
use crate::error::{BackendAttempt, EngineError, ProvisionError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use inferd_hardware::BackendKind;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome shared by every caller waiting on one initialisation
pub type ProvisionOutcome = Result<Arc<LivePipeline>, ProvisionError>;

type SharedProvision = Shared<BoxFuture<'static, ProvisionOutcome>>;

/// An initialised pipeline together with how it was provisioned.
pub struct LivePipeline {
    model_path: PathBuf,
    backend: BackendKind,
    /// Devices behind a composed target, empty for single-backend pipelines
    composed_of: Vec<BackendKind>,
    failed_attempts: Vec<BackendAttempt>,
    provisioned_at: DateTime<Utc>,
    pipeline: Arc<dyn Pipeline>,
    gate: Option<tokio::sync::Mutex<()>>,
}

impl LivePipeline {
    pub(crate) fn new(
        model_path: PathBuf,
        backend: BackendKind,
        composed_of: Vec<BackendKind>,
        failed_attempts: Vec<BackendAttempt>,
        pipeline: Arc<dyn Pipeline>,
        serialize: bool,
    ) -> Self {
        Self {
            model_path,
            backend,
            composed_of,
            failed_attempts,
            provisioned_at: Utc::now(),
            pipeline,
            gate: serialize.then(|| tokio::sync::Mutex::new(())),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// The backend that initialised successfully (`MIXED` for composed targets)
    pub fn active_backend(&self) -> &BackendKind {
        &self.backend
    }

    pub fn composed_of(&self) -> &[BackendKind] {
        &self.composed_of
    }

    /// Backends tried and failed before this one, in priority order
    pub fn failed_attempts(&self) -> &[BackendAttempt] {
        &self.failed_attempts
    }

    pub fn provisioned_at(&self) -> DateTime<Utc> {
        self.provisioned_at
    }

    pub fn is_serialized(&self) -> bool {
        self.gate.is_some()
    }

    /// Human-readable device label, e.g. `NPU` or `MIXED:NPU,GPU,CPU`.
    pub fn device_label(&self) -> String {
        if self.composed_of.is_empty() {
            return self.backend.to_string();
        }
        let members = self
            .composed_of
            .iter()
            .map(BackendKind::as_str)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}:{members}", self.backend)
    }

    /// Run the pipeline, holding the per-pipeline gate when calls are serialised.
    pub async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, EngineError> {
        let _guard = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        self.pipeline.generate(prompt, max_tokens).await
    }
}

impl std::fmt::Debug for LivePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePipeline")
            .field("model_path", &self.model_path)
            .field("backend", &self.backend)
            .field("composed_of", &self.composed_of)
            .field("failed_attempts", &self.failed_attempts)
            .field("provisioned_at", &self.provisioned_at)
            .field("serialized", &self.gate.is_some())
            .finish()
    }
}

enum Slot {
    Pending(SharedProvision),
    Ready(Arc<LivePipeline>),
}

/// Process-lifetime cache of live pipelines, keyed by canonical model path.
#[derive(Default)]
pub struct PipelineCache {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    latest: RwLock<Option<Arc<LivePipeline>>>,
    closed: AtomicBool,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached pipeline for `key`, joining an in-flight
    /// initialisation or starting one with `init`.
    ///
    /// `init` runs on its own task, so it completes even if the caller that
    /// started it goes away.
    pub async fn get_or_provision<F>(self: &Arc<Self>, key: PathBuf, init: F) -> ProvisionOutcome
    where
        F: FnOnce() -> BoxFuture<'static, ProvisionOutcome>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProvisionError::ShuttingDown);
        }

        let shared = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready(live)) => return Ok(Arc::clone(live)),
                Some(Slot::Pending(shared)) => {
                    tracing::debug!(model = %key.display(), "joining in-flight provisioning");
                    shared.clone()
                }
                None => {
                    let shared = self.spawn_init(key.clone(), init());
                    slots.insert(key, Slot::Pending(shared.clone()));
                    shared
                }
            }
        };

        shared.await
    }

    fn spawn_init(
        self: &Arc<Self>,
        key: PathBuf,
        init: BoxFuture<'static, ProvisionOutcome>,
    ) -> SharedProvision {
        let cache = Arc::clone(self);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let outcome = init.await;
            cache.settle(&task_key, &outcome);
            outcome
        });

        let cache = Arc::clone(self);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    tracing::error!(model = %key.display(), error = %join_err, "provisioning task aborted");
                    cache.slots.lock().remove(&key);
                    Err(ProvisionError::Internal(format!(
                        "provisioning task aborted: {join_err}"
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    fn settle(&self, key: &Path, outcome: &ProvisionOutcome) {
        let mut slots = self.slots.lock();
        match outcome {
            Ok(live) if !self.closed.load(Ordering::SeqCst) => {
                slots.insert(key.to_path_buf(), Slot::Ready(Arc::clone(live)));
                *self.latest.write() = Some(Arc::clone(live));
            }
            _ => {
                slots.remove(key);
            }
        }
    }

    /// Ready pipeline for `key`, without starting anything
    pub fn get(&self, key: &Path) -> Option<Arc<LivePipeline>> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(live)) => Some(Arc::clone(live)),
            _ => None,
        }
    }

    /// Number of ready pipelines
    pub fn ready_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    /// Number of initialisations still in flight
    pub fn pending_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|s| matches!(s, Slot::Pending(_)))
            .count()
    }

    /// Most recently provisioned pipeline that is still cached
    pub fn latest(&self) -> Option<Arc<LivePipeline>> {
        self.latest.read().clone()
    }

    /// Close the cache and hand back every ready pipeline for release.
    /// Later lookups fail with [`ProvisionError::ShuttingDown`].
    pub fn drain(&self) -> Vec<Arc<LivePipeline>> {
        self.closed.store(true, Ordering::SeqCst);
        let mut slots = self.slots.lock();
        *self.latest.write() = None;
        slots
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(live) => Some(live),
                Slot::Pending(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Pipeline for Echo {
        async fn generate(&self, prompt: &str, _max: usize) -> Result<String, EngineError> {
            Ok(prompt.to_string())
        }
    }

    /// Records the highest number of `generate` calls running at once
    #[derive(Default)]
    struct Overlap {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Pipeline for Overlap {
        async fn generate(&self, prompt: &str, _max: usize) -> Result<String, EngineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(prompt.to_string())
        }

        fn is_reentrant(&self) -> bool {
            true
        }
    }

    async fn peak_overlap(serialize: bool) -> usize {
        let inner = Arc::new(Overlap::default());
        let p = Arc::new(LivePipeline::new(
            PathBuf::from("/m"),
            BackendKind::Cpu,
            Vec::new(),
            Vec::new(),
            inner.clone(),
            serialize,
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let p = Arc::clone(&p);
                tokio::spawn(async move { p.generate(&format!("call {i}"), 4).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        inner.peak.load(Ordering::SeqCst)
    }

    fn live(path: &str) -> Arc<LivePipeline> {
        Arc::new(LivePipeline::new(
            PathBuf::from(path),
            BackendKind::Cpu,
            Vec::new(),
            Vec::new(),
            Arc::new(Echo),
            true,
        ))
    }

    #[tokio::test]
    async fn test_ready_entry_is_reused() {
        let cache = Arc::new(PipelineCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut results = Vec::new();
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let out = cache
                .get_or_provision(PathBuf::from("/m"), move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(live("/m"))
                    }
                    .boxed()
                })
                .await
                .unwrap();
            results.push(out);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&results[0], &results[1]));
        assert_eq!(cache.ready_count(), 1);
        assert!(Arc::ptr_eq(&cache.latest().unwrap(), &results[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failure_is_shared_then_retryable() {
        let cache = Arc::new(PipelineCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_provision(PathBuf::from("/bad"), move || {
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(ProvisionError::Internal("boom".into()))
                        }
                        .boxed()
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(
                h.await.unwrap().unwrap_err(),
                ProvisionError::Internal("boom".into())
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.pending_count(), 0);

        let retried = cache
            .get_or_provision(PathBuf::from("/bad"), || async { Ok(live("/bad")) }.boxed())
            .await;
        assert!(retried.is_ok());
    }

    #[tokio::test]
    async fn test_drain_closes_cache() {
        let cache = Arc::new(PipelineCache::new());
        cache
            .get_or_provision(PathBuf::from("/m"), || async { Ok(live("/m")) }.boxed())
            .await
            .unwrap();

        let drained = cache.drain();
        assert_eq!(drained.len(), 1);
        assert!(cache.latest().is_none());
        let err = cache
            .get_or_provision(PathBuf::from("/m"), || async { Ok(live("/m")) }.boxed())
            .await
            .unwrap_err();
        assert_eq!(err, ProvisionError::ShuttingDown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gated_pipeline_never_overlaps() {
        assert_eq!(peak_overlap(true).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ungated_pipeline_runs_concurrently() {
        assert!(peak_overlap(false).await > 1);
    }

    #[tokio::test]
    async fn test_serialized_generate_and_label() {
        let p = live("/m");
        assert!(p.is_serialized());
        assert_eq!(p.generate("hi", 4).await.unwrap(), "hi");
        assert_eq!(p.device_label(), "CPU");

        let mixed = LivePipeline::new(
            PathBuf::from("/m"),
            BackendKind::Mixed,
            vec![BackendKind::Npu, BackendKind::Cpu],
            Vec::new(),
            Arc::new(Echo),
            false,
        );
        assert_eq!(mixed.device_label(), "MIXED:NPU,CPU");
    }
}
