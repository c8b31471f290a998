//! Health endpoint
//!
//! GET /health - 200 once a pipeline is ready, 503 before that

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// GET /health
///
/// Reports the device label of the most recently provisioned pipeline.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.provisioner.status();
    if !status.ready {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "pipelineInitialized": false,
                "inFlight": status.in_flight,
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "pipelineInitialized": true,
            "device": status.device,
            "backends": status.backends,
            "modelPath": status.model_path,
            "cachedPipelines": status.cached_pipelines,
        })),
    )
}

pub fn health_router() -> axum::Router<Arc<AppState>> {
    use axum::routing::get;
    axum::Router::new().route("/health", get(health))
}
