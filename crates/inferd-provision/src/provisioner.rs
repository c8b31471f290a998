//! Pipeline Provisioner
//!
//! Obtains a ready pipeline for a model directory. Each key moves through
//! `Uninitialized -> ProbingEnv -> Attempting(i) -> Ready | Exhausted`:
//!
//! - **Sequential** walks the backend priority in order and keeps the first
//!   backend the engine accepts. Individual failures are logged and recorded;
//!   only exhausting the whole list fails the call.
//! - **Mixed** writes the whole priority into the process environment as a
//!   hint and makes exactly one `MIXED` initialisation. There is no fallback.
//!
//! Both strategies first apply the performance configuration step. Results
//! are cached per canonical model path through [`PipelineCache`], which
//! collapses concurrent first-time requests into one initialisation.
//!
//! # Example
//!
//! ```rust,no_run
//! use inferd_provision::{
//!     ProcessEnvironment, Provisioner, ProvisionerConfig, ReferenceEngine, resolve_str,
//! };
//! use inferd_hardware::Capabilities;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let env = ProcessEnvironment::new();
//! let config = ProvisionerConfig::default();
//! let engine = ReferenceEngine::new(&Capabilities::cpu_only(), env.clone(), &config.performance);
//! let provisioner = Provisioner::new(Arc::new(engine), env, config);
//!
//! let priority = resolve_str("npu,gpu,cpu")?;
//! let pipeline = provisioner.provision("/models/llama", &priority).await?;
//! println!("{}", pipeline.generate("hello", 32).await?);
//! # Ok(())
//! # }
//! ```

use crate::cache::{LivePipeline, PipelineCache, ProvisionOutcome};
use crate::engine::InferenceEngine;
use crate::env::{PerformanceConfig, ProcessEnvironment};
use crate::error::{BackendAttempt, ConfigError, EngineError, ProvisionError};
use crate::priority::BackendPriority;
use futures::FutureExt;
use inferd_hardware::{BackendKind, HardwareInventory};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, warn};

/// Most recent failed keys remembered for [`Provisioner::state`]
pub const RECENT_FAILURES: usize = 32;

/// How backends are tried for a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStrategy {
    /// Try each backend in priority order, keep the first that initialises
    #[default]
    Sequential,
    /// One composed target balanced across the hinted backends
    Mixed,
}

impl fmt::Display for ProvisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStrategy::Sequential => write!(f, "sequential"),
            ProvisionStrategy::Mixed => write!(f, "mixed"),
        }
    }
}

impl FromStr for ProvisionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ProvisionStrategy::Sequential),
            "mixed" => Ok(ProvisionStrategy::Mixed),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Whether a ready pipeline may be invoked by several callers at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationPolicy {
    /// One `generate` at a time per pipeline
    #[default]
    Serialize,
    /// Concurrent `generate`, for pipelines that report themselves reentrant
    Concurrent,
}

impl fmt::Display for InvocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationPolicy::Serialize => write!(f, "serialize"),
            InvocationPolicy::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl FromStr for InvocationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serialize" => Ok(InvocationPolicy::Serialize),
            "concurrent" => Ok(InvocationPolicy::Concurrent),
            other => Err(ConfigError::UnknownInvocationPolicy(other.to_string())),
        }
    }
}

/// Configuration for [`Provisioner`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub strategy: ProvisionStrategy,
    pub invocation: InvocationPolicy,
    pub performance: PerformanceConfig,
}

impl ProvisionerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: ProvisionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_invocation(mut self, invocation: InvocationPolicy) -> Self {
        self.invocation = invocation;
        self
    }

    pub fn with_performance(mut self, performance: PerformanceConfig) -> Self {
        self.performance = performance;
        self
    }
}

/// Provisioning progress for one model key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum ProvisionState {
    Uninitialized,
    ProbingEnv,
    /// Initialising the backend at this index of the priority list
    Attempting(usize),
    Ready,
    Exhausted,
}

/// Snapshot backing the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionerStatus {
    pub ready: bool,
    pub cached_pipelines: usize,
    pub in_flight: usize,
    /// Device label of the most recently provisioned pipeline
    pub device: Option<String>,
    pub active_backend: Option<BackendKind>,
    pub backends: Vec<BackendKind>,
    pub model_path: Option<PathBuf>,
}

/// Provisions and caches pipelines. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<ProvisionerInner>,
}

struct ProvisionerInner {
    engine: Arc<dyn InferenceEngine>,
    env: ProcessEnvironment,
    config: ProvisionerConfig,
    cache: Arc<PipelineCache>,
    /// Logical cores from the latest inventory, 0 when unknown
    logical_cores: AtomicUsize,
    /// Keys that are initialising or ready; failed keys leave this map
    states: Mutex<HashMap<PathBuf, ProvisionState>>,
    /// Recently exhausted keys, oldest first, at most [`RECENT_FAILURES`]
    failures: Mutex<VecDeque<PathBuf>>,
}

impl Provisioner {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        env: ProcessEnvironment,
        config: ProvisionerConfig,
    ) -> Self {
        info!(
            engine = engine.name(),
            strategy = %config.strategy,
            invocation = %config.invocation,
            "provisioner created"
        );
        Self {
            inner: Arc::new(ProvisionerInner {
                engine,
                env,
                config,
                cache: Arc::new(PipelineCache::new()),
                logical_cores: AtomicUsize::new(0),
                states: Mutex::new(HashMap::new()),
                failures: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.inner.config
    }

    pub fn environment(&self) -> &ProcessEnvironment {
        &self.inner.env
    }

    /// Record the core count used by the performance configuration step.
    pub fn observe_inventory(&self, inventory: &HardwareInventory) {
        let cores = inventory.known_cores().unwrap_or(0);
        self.inner.logical_cores.store(cores, Ordering::Relaxed);
        debug!(cores, "inventory observed");
    }

    /// Return the pipeline for `model_path`, initialising it on first use.
    ///
    /// Concurrent first-time calls for the same path share one
    /// initialisation and receive the same pipeline or the same error.
    /// A failed key is not cached; a later call tries again.
    ///
    /// # Errors
    /// - [`ProvisionError::InvalidModelPath`] for an empty or unresolvable path
    /// - [`ProvisionError::BackendExhausted`] when every sequential candidate failed
    /// - [`ProvisionError::MixedInit`] when the composed target failed
    /// - [`ProvisionError::ShuttingDown`] after [`Provisioner::shutdown`]
    pub async fn provision(
        &self,
        model_path: impl AsRef<Path>,
        priority: &BackendPriority,
    ) -> Result<Arc<LivePipeline>, ProvisionError> {
        let key = model_key(model_path.as_ref()).await?;
        let inner = Arc::clone(&self.inner);
        let priority = priority.clone();
        let task_key = key.clone();

        self.inner
            .cache
            .get_or_provision(key, move || inner.initialize(task_key, priority).boxed())
            .await
    }

    /// Current state for `model_path`.
    ///
    /// `Exhausted` is reported only while the key is among the
    /// [`RECENT_FAILURES`] latest failures; older failures and keys never
    /// requested read as `Uninitialized`.
    pub async fn state(&self, model_path: impl AsRef<Path>) -> ProvisionState {
        let Ok(key) = model_key(model_path.as_ref()).await else {
            return ProvisionState::Uninitialized;
        };
        if let Some(state) = self.inner.states.lock().get(&key) {
            return *state;
        }
        if self.inner.failures.lock().contains(&key) {
            return ProvisionState::Exhausted;
        }
        ProvisionState::Uninitialized
    }

    /// Most recently provisioned pipeline still in the cache
    pub fn latest(&self) -> Option<Arc<LivePipeline>> {
        self.inner.cache.latest()
    }

    pub fn status(&self) -> ProvisionerStatus {
        let latest = self.inner.cache.latest();
        let cached_pipelines = self.inner.cache.ready_count();
        ProvisionerStatus {
            ready: cached_pipelines > 0,
            cached_pipelines,
            in_flight: self.inner.cache.pending_count(),
            device: latest.as_ref().map(|p| p.device_label()),
            active_backend: latest.as_ref().map(|p| p.active_backend().clone()),
            backends: latest
                .as_ref()
                .map(|p| {
                    if p.composed_of().is_empty() {
                        vec![p.active_backend().clone()]
                    } else {
                        p.composed_of().to_vec()
                    }
                })
                .unwrap_or_default(),
            model_path: latest.map(|p| p.model_path().to_path_buf()),
        }
    }

    /// Release every cached pipeline. Later `provision` calls fail with
    /// [`ProvisionError::ShuttingDown`]. Returns the number released.
    pub fn shutdown(&self) -> usize {
        let released = self.inner.cache.drain();
        for pipeline in &released {
            info!(
                model = %pipeline.model_path().display(),
                device = %pipeline.device_label(),
                "releasing pipeline"
            );
        }
        self.inner.states.lock().clear();
        self.inner.failures.lock().clear();
        info!(count = released.len(), "provisioner shut down");
        released.len()
    }
}

impl ProvisionerInner {
    fn set_state(&self, key: &Path, state: ProvisionState) {
        if state == ProvisionState::Ready {
            self.failures.lock().retain(|k| k != key);
        }
        self.states.lock().insert(key.to_path_buf(), state);
    }

    /// Drop the key from the live states and remember it as a recent failure.
    fn record_failure(&self, key: &Path) {
        {
            let mut failures = self.failures.lock();
            failures.retain(|k| k != key);
            failures.push_back(key.to_path_buf());
            while failures.len() > RECENT_FAILURES {
                failures.pop_front();
            }
        }
        self.states.lock().remove(key);
    }

    async fn initialize(self: Arc<Self>, key: PathBuf, priority: BackendPriority) -> ProvisionOutcome {
        self.set_state(&key, ProvisionState::ProbingEnv);
        self.configure_performance(&priority);

        match self.config.strategy {
            ProvisionStrategy::Sequential => self.initialize_sequential(key, &priority).await,
            ProvisionStrategy::Mixed => self.initialize_mixed(key, &priority).await,
        }
    }

    async fn initialize_sequential(&self, key: PathBuf, priority: &BackendPriority) -> ProvisionOutcome {
        let mut attempts: Vec<BackendAttempt> = Vec::new();

        for (index, backend) in priority.iter().enumerate() {
            self.set_state(&key, ProvisionState::Attempting(index));
            debug!(model = %key.display(), backend = %backend, index, "initialising backend");

            match self.engine.initialize(&key, backend).await {
                Ok(pipeline) => {
                    info!(
                        model = %key.display(),
                        backend = %backend,
                        failed_before = attempts.len(),
                        "pipeline ready"
                    );
                    let serialize = self.serialize(pipeline.is_reentrant());
                    self.set_state(&key, ProvisionState::Ready);
                    return Ok(Arc::new(LivePipeline::new(
                        key,
                        backend.clone(),
                        Vec::new(),
                        attempts,
                        pipeline,
                        serialize,
                    )));
                }
                Err(e) => {
                    warn!(model = %key.display(), backend = %backend, error = %e, "backend initialisation failed");
                    attempts.push(BackendAttempt {
                        backend: backend.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.record_failure(&key);
        let err = ProvisionError::BackendExhausted {
            model: key,
            attempts,
        };
        error!(error = %err, "no backend could be initialised");
        Err(err)
    }

    async fn initialize_mixed(&self, key: PathBuf, priority: &BackendPriority) -> ProvisionOutcome {
        let hint = priority.hint();
        let failed = |key: PathBuf, error: EngineError| ProvisionError::MixedInit {
            model: key,
            hint: hint.clone(),
            error,
        };

        if let Err(e) = self.env.set(&self.config.performance.priority_key, hint.clone()) {
            self.record_failure(&key);
            return Err(failed(key, EngineError::InitFailed(e.to_string())));
        }

        self.set_state(&key, ProvisionState::Attempting(0));
        debug!(model = %key.display(), hint = %hint, "initialising mixed target");

        match self.engine.initialize(&key, &BackendKind::Mixed).await {
            Ok(pipeline) => {
                info!(model = %key.display(), hint = %hint, "mixed pipeline ready");
                let serialize = self.serialize(pipeline.is_reentrant());
                self.set_state(&key, ProvisionState::Ready);
                Ok(Arc::new(LivePipeline::new(
                    key,
                    BackendKind::Mixed,
                    priority.as_slice().to_vec(),
                    Vec::new(),
                    pipeline,
                    serialize,
                )))
            }
            Err(e) => {
                self.record_failure(&key);
                let err = failed(key, e);
                error!(error = %err, "mixed target initialisation failed");
                Err(err)
            }
        }
    }

    fn serialize(&self, reentrant: bool) -> bool {
        self.config.invocation == InvocationPolicy::Serialize || !reentrant
    }

    /// Best-effort performance hints; failures are logged and ignored.
    fn configure_performance(&self, priority: &BackendPriority) {
        let perf = &self.config.performance;
        let mut hints: Vec<(&str, String)> = Vec::with_capacity(3);

        if priority.contains(&BackendKind::Cpu) {
            let threads = match self.logical_cores.load(Ordering::Relaxed) {
                0 => 1,
                n => n,
            };
            hints.push((perf.thread_count_key.as_str(), threads.to_string()));
        }
        hints.push((perf.isa_key.as_str(), perf.isa_value.clone()));
        hints.push((perf.allocator_key.as_str(), perf.allocator_value.clone()));

        for (key, value) in hints {
            if let Err(e) = self.env.set(key, value) {
                debug!(key, error = %e, "performance hint not applied");
            }
        }
    }
}

/// Cache key for a model path: canonical when the path exists, absolute otherwise.
async fn model_key(path: &Path) -> Result<PathBuf, ProvisionError> {
    if path.as_os_str().is_empty() {
        return Err(ProvisionError::InvalidModelPath {
            path: String::new(),
            reason: "path is empty".to_string(),
        });
    }
    match tokio::fs::canonicalize(path).await {
        Ok(canonical) => Ok(canonical),
        Err(_) => std::path::absolute(path).map_err(|e| ProvisionError::InvalidModelPath {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Pipeline;
    use crate::priority::resolve_str;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct StubPipeline {
        backend: BackendKind,
        reentrant: bool,
    }

    #[async_trait]
    impl Pipeline for StubPipeline {
        async fn generate(&self, prompt: &str, _max_tokens: usize) -> Result<String, EngineError> {
            Ok(format!("{}: {prompt}", self.backend))
        }

        fn is_reentrant(&self) -> bool {
            self.reentrant
        }
    }

    /// Engine that refuses a fixed set of backends and records every call
    struct ScriptedEngine {
        refuse: HashSet<BackendKind>,
        refuse_all: AtomicBool,
        delay: Duration,
        reentrant: bool,
        calls: Mutex<Vec<BackendKind>>,
        /// Initialisations in progress and the highest count seen
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(refuse: &[BackendKind]) -> Self {
            Self {
                refuse: refuse.iter().cloned().collect(),
                refuse_all: AtomicBool::new(false),
                delay: Duration::ZERO,
                reentrant: false,
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn reentrant(mut self) -> Self {
            self.reentrant = true;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<BackendKind> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl InferenceEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn initialize(
            &self,
            _model_dir: &Path,
            backend: &BackendKind,
        ) -> Result<Arc<dyn Pipeline>, EngineError> {
            self.calls.lock().push(backend.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.refuse_all.load(Ordering::SeqCst) || self.refuse.contains(backend) {
                return Err(EngineError::InitFailed(format!("{backend} refused")));
            }
            Ok(Arc::new(StubPipeline {
                backend: backend.clone(),
                reentrant: self.reentrant,
            }))
        }
    }

    fn provisioner(engine: Arc<ScriptedEngine>, strategy: ProvisionStrategy) -> Provisioner {
        Provisioner::new(
            engine,
            ProcessEnvironment::new(),
            ProvisionerConfig::new().with_strategy(strategy),
        )
    }

    #[tokio::test]
    async fn test_sequential_falls_back_to_cpu() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[BackendKind::Npu, BackendKind::Gpu]));
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);

        let live = p
            .provision(dir.path(), &resolve_str("NPU,GPU,CPU").unwrap())
            .await
            .unwrap();

        assert_eq!(live.active_backend(), &BackendKind::Cpu);
        let failed: Vec<_> = live.failed_attempts().iter().map(|a| a.backend.clone()).collect();
        assert_eq!(failed, vec![BackendKind::Npu, BackendKind::Gpu]);
        assert_eq!(engine.calls().len(), 3);
        assert_eq!(p.state(dir.path()).await, ProvisionState::Ready);
        assert_eq!(live.generate("hi", 8).await.unwrap(), "CPU: hi");
    }

    #[tokio::test]
    async fn test_sequential_exhaustion_names_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[
            BackendKind::Npu,
            BackendKind::Gpu,
            BackendKind::Cpu,
        ]));
        let p = provisioner(engine, ProvisionStrategy::Sequential);

        let err = p
            .provision(dir.path(), &resolve_str("NPU,GPU,CPU").unwrap())
            .await
            .unwrap_err();

        assert_eq!(
            err.attempted_backends(),
            vec![BackendKind::Npu, BackendKind::Gpu, BackendKind::Cpu]
        );
        let msg = err.to_string();
        assert!(msg.contains("NPU refused") && msg.contains("CPU refused"), "{msg}");
        assert_eq!(p.state(dir.path()).await, ProvisionState::Exhausted);
        assert!(!p.status().ready);
    }

    #[tokio::test]
    async fn test_second_call_reuses_cached_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);
        let priority = resolve_str("CPU").unwrap();

        let first = p.provision(dir.path(), &priority).await.unwrap();
        let second = p.provision(dir.path(), &priority).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.calls(), vec![BackendKind::Cpu]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_initialisation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]).with_delay(Duration::from_millis(50)));
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);
        let priority = resolve_str("CPU").unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let p = p.clone();
            let priority = priority.clone();
            let path = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move { p.provision(path, &priority).await }));
        }

        let mut pipelines = Vec::new();
        for h in handles {
            pipelines.push(h.await.unwrap().unwrap());
        }
        assert_eq!(engine.calls().len(), 1);
        assert!(pipelines.iter().all(|live| Arc::ptr_eq(live, &pipelines[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            ScriptedEngine::new(&[BackendKind::Cpu]).with_delay(Duration::from_millis(50)),
        );
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);
        let priority = resolve_str("CPU").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let p = p.clone();
            let priority = priority.clone();
            let path = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move { p.provision(path, &priority).await }));
        }

        let mut errors = Vec::new();
        for h in handles {
            errors.push(h.await.unwrap().unwrap_err());
        }
        assert_eq!(engine.calls().len(), 1);
        assert!(errors.iter().all(|e| *e == errors[0]));
    }

    #[tokio::test]
    async fn test_failed_key_is_retried_by_a_later_call() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        engine.refuse_all.store(true, Ordering::SeqCst);
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);
        let priority = resolve_str("GPU,CPU").unwrap();

        assert!(p.provision(dir.path(), &priority).await.is_err());
        engine.refuse_all.store(false, Ordering::SeqCst);
        let live = p.provision(dir.path(), &priority).await.unwrap();

        assert_eq!(live.active_backend(), &BackendKind::Gpu);
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mixed_writes_hint_and_calls_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        let p = provisioner(engine.clone(), ProvisionStrategy::Mixed);

        let live = p
            .provision(dir.path(), &resolve_str("npu,gpu,cpu").unwrap())
            .await
            .unwrap();

        assert_eq!(engine.calls(), vec![BackendKind::Mixed]);
        assert_eq!(
            p.environment().get("INFERD_DEVICE_PRIORITIES").as_deref(),
            Some("NPU,GPU,CPU")
        );
        assert_eq!(live.device_label(), "MIXED:NPU,GPU,CPU");
        assert_eq!(p.status().backends.len(), 3);
    }

    #[tokio::test]
    async fn test_mixed_failure_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[BackendKind::Mixed]));
        let p = provisioner(engine.clone(), ProvisionStrategy::Mixed);

        let err = p
            .provision(dir.path(), &resolve_str("NPU,CPU").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::MixedInit { ref hint, .. } if hint == "NPU,CPU"));
        assert_eq!(engine.calls(), vec![BackendKind::Mixed]);
    }

    #[tokio::test]
    async fn test_performance_hints() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        let p = provisioner(engine, ProvisionStrategy::Sequential);

        let mut inventory = HardwareInventory::default();
        inventory.cpu.logical_cores = 8;
        p.observe_inventory(&inventory);
        p.provision(dir.path(), &resolve_str("CPU").unwrap())
            .await
            .unwrap();

        let env = p.environment();
        assert_eq!(env.get("OMP_NUM_THREADS").as_deref(), Some("8"));
        assert_eq!(env.get("ONEDNN_MAX_CPU_ISA").as_deref(), Some("ALL"));
        assert_eq!(env.get("MALLOC_ARENA_MAX").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_thread_hint_only_when_cpu_listed() {
        let gpu_dir = tempfile::tempdir().unwrap();
        let cpu_dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        let p = provisioner(engine, ProvisionStrategy::Sequential);

        p.provision(gpu_dir.path(), &resolve_str("GPU").unwrap())
            .await
            .unwrap();
        assert!(p.environment().get("OMP_NUM_THREADS").is_none());
        assert!(p.environment().get("MALLOC_ARENA_MAX").is_some());

        // unknown core count falls back to one thread
        p.provision(cpu_dir.path(), &resolve_str("CPU").unwrap())
            .await
            .unwrap();
        assert_eq!(p.environment().get("OMP_NUM_THREADS").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_invocation_policy() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        let p = Provisioner::new(
            engine,
            ProcessEnvironment::new(),
            ProvisionerConfig::new().with_invocation(InvocationPolicy::Concurrent),
        );

        // stub pipelines are not reentrant, so calls stay serialised
        let live = p
            .provision(dir.path(), &resolve_str("CPU").unwrap())
            .await
            .unwrap();
        assert!(live.is_serialized());
    }

    #[tokio::test]
    async fn test_concurrent_policy_with_reentrant_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let priority = resolve_str("CPU").unwrap();

        let concurrent = Provisioner::new(
            Arc::new(ScriptedEngine::new(&[]).reentrant()),
            ProcessEnvironment::new(),
            ProvisionerConfig::new().with_invocation(InvocationPolicy::Concurrent),
        );
        let live = concurrent.provision(dir.path(), &priority).await.unwrap();
        assert!(!live.is_serialized());

        // the default policy gates even a reentrant pipeline
        let serialized = provisioner(
            Arc::new(ScriptedEngine::new(&[]).reentrant()),
            ProvisionStrategy::Sequential,
        );
        let live = serialized.provision(dir.path(), &priority).await.unwrap();
        assert!(live.is_serialized());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_models_initialise_in_parallel() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]).with_delay(Duration::from_millis(100)));
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);
        let priority = resolve_str("CPU").unwrap();

        let (a, b) = tokio::join!(
            p.provision(first.path(), &priority),
            p.provision(second.path(), &priority),
        );

        assert!(!Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(engine.calls().len(), 2);
        assert_eq!(engine.peak.load(Ordering::SeqCst), 2);
        assert_eq!(p.status().cached_pipelines, 2);
    }

    #[tokio::test]
    async fn test_failed_keys_do_not_accumulate() {
        let engine = Arc::new(ScriptedEngine::new(&[BackendKind::Cpu]));
        let p = provisioner(engine, ProvisionStrategy::Sequential);
        let priority = resolve_str("CPU").unwrap();

        for i in 0..2_000 {
            let path = format!("/nonexistent/inferd-model-{i}");
            assert!(p.provision(&path, &priority).await.is_err());
        }

        assert!(p.inner.states.lock().is_empty());
        assert_eq!(p.inner.failures.lock().len(), RECENT_FAILURES);
        assert_eq!(
            p.state("/nonexistent/inferd-model-1999").await,
            ProvisionState::Exhausted
        );
        assert_eq!(
            p.state("/nonexistent/inferd-model-0").await,
            ProvisionState::Uninitialized
        );
        assert_eq!(p.status().in_flight, 0);
    }

    #[tokio::test]
    async fn test_recovered_key_leaves_failure_history() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[]));
        engine.refuse_all.store(true, Ordering::SeqCst);
        let p = provisioner(engine.clone(), ProvisionStrategy::Sequential);
        let priority = resolve_str("CPU").unwrap();

        assert!(p.provision(dir.path(), &priority).await.is_err());
        assert_eq!(p.state(dir.path()).await, ProvisionState::Exhausted);

        engine.refuse_all.store(false, Ordering::SeqCst);
        p.provision(dir.path(), &priority).await.unwrap();
        assert_eq!(p.state(dir.path()).await, ProvisionState::Ready);
        assert!(p.inner.failures.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(&[BackendKind::Npu]));
        let p = provisioner(engine, ProvisionStrategy::Sequential);
        let priority = resolve_str("NPU,CPU").unwrap();

        assert!(!p.status().ready);
        assert_eq!(p.state(dir.path()).await, ProvisionState::Uninitialized);

        p.provision(dir.path(), &priority).await.unwrap();
        let status = p.status();
        assert!(status.ready);
        assert_eq!(status.device.as_deref(), Some("CPU"));
        assert_eq!(status.cached_pipelines, 1);

        assert_eq!(p.shutdown(), 1);
        assert!(!p.status().ready);
        assert_eq!(
            p.provision(dir.path(), &priority).await.unwrap_err(),
            ProvisionError::ShuttingDown
        );
    }

    #[test]
    fn test_strategy_and_policy_parse() {
        assert_eq!("Mixed".parse::<ProvisionStrategy>(), Ok(ProvisionStrategy::Mixed));
        assert!(matches!(
            "random".parse::<ProvisionStrategy>(),
            Err(ConfigError::UnknownStrategy(_))
        ));
        assert_eq!(
            " concurrent ".parse::<InvocationPolicy>(),
            Ok(InvocationPolicy::Concurrent)
        );
        assert_eq!(InvocationPolicy::default(), InvocationPolicy::Serialize);
    }

    #[tokio::test]
    async fn test_empty_model_path_is_rejected() {
        assert!(matches!(
            model_key(Path::new("")).await,
            Err(ProvisionError::InvalidModelPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_model_key_resolves_existing_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("model");
        std::fs::create_dir(&nested).unwrap();

        let via_dots = dir.path().join("model/../model");
        assert_eq!(
            model_key(&via_dots).await.unwrap(),
            std::fs::canonicalize(&nested).unwrap()
        );

        let missing = model_key(Path::new("relative/missing-model")).await.unwrap();
        assert!(missing.is_absolute());
        assert!(missing.ends_with("relative/missing-model"));
    }
}
