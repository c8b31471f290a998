//! HTTP server assembly
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service index |
//! | `GET`  | `/health` | `200` once a pipeline is ready, `503` before |
//! | `GET`  | `/hardware` | Fresh probe: inventory, capabilities, storage, build flags |
//! | `POST` | `/generate` | Generate text with the provisioned pipeline |

use axum::{Router, response::IntoResponse, response::Response};
use inferd_hardware::{HardwareProbe, ProbeRunner, classify};
use inferd_provision::{ProcessEnvironment, Provisioner, ReferenceEngine};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{ServiceConfig, ServiceConfigError};
use crate::error::ServerError;
use crate::handlers::{generate_router, hardware_router, health_router, index_router};
use crate::state::AppState;

/// Build the application router over `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(index_router())
        .merge(health_router())
        .merge(hardware_router())
        .merge(generate_router())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    ServerError::Internal(format!("handler panicked: {detail}")).into_response()
}

/// Probe the host, wire the engine and provisioner, and optionally
/// provision the default model before serving.
///
/// An eager provisioning failure is logged, not returned: the server still
/// starts and `/health` reports 503 until a later request succeeds.
pub async fn bootstrap(
    config: &ServiceConfig,
    runner: Arc<dyn ProbeRunner>,
) -> Result<Arc<AppState>, ServiceConfigError> {
    let priority = config.priority()?;
    let probe = HardwareProbe::new(runner, config.signature_table());

    let (inventory, statuses) = probe.inventory().await;
    let capabilities = classify(&inventory, probe.signatures());
    info!(
        cpu = %inventory.cpu.model,
        cores = inventory.cpu.logical_cores,
        backends = ?capabilities.available_backends,
        probes_ok = statuses.iter().filter(|s| s.available).count(),
        "host capabilities detected"
    );
    for backend in priority.iter() {
        if !capabilities.has(backend) && *backend != inferd_hardware::BackendKind::Mixed {
            warn!(backend = %backend, "configured backend was not detected on this host");
        }
    }

    let env = ProcessEnvironment::new();
    let engine = ReferenceEngine::new(&capabilities, env.clone(), &config.performance);
    let provisioner = Provisioner::new(Arc::new(engine), env, config.provisioner_config());
    provisioner.observe_inventory(&inventory);

    let mut state = AppState::new(provisioner, Arc::new(probe), priority)
        .with_default_max_new_tokens(config.default_max_new_tokens);
    if let Some(model) = &config.model_path {
        state = state.with_default_model(model.clone());
    }

    if config.eager {
        match &state.default_model {
            Some(model) => match state.provisioner.provision(model, &state.priority).await {
                Ok(pipeline) => info!(device = %pipeline.device_label(), "default model provisioned"),
                Err(e) => error!(error = %e, "eager provisioning failed; serving anyway"),
            },
            None => warn!("eager provisioning requested but no model_path is configured"),
        }
    }

    Ok(Arc::new(state))
}

/// The inference HTTP server
pub struct InferdServer {
    addr: String,
    state: Arc<AppState>,
}

impl InferdServer {
    pub fn new(addr: impl Into<String>, state: Arc<AppState>) -> Self {
        Self {
            addr: addr.into(),
            state,
        }
    }

    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    /// Serve until Ctrl-C or SIGTERM, then release every cached pipeline.
    pub async fn start(self) -> std::io::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!(addr = %listener.local_addr()?, "inferd listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let released = self.state.provisioner.shutdown();
        info!(released, "inferd stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
