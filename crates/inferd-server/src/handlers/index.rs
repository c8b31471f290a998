//! Service index
//!
//! GET / - service name, version and the endpoint list

use axum::{Json, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// GET /
pub async fn index() -> impl IntoResponse {
    Json(json!({
        "service": "inferd",
        "version": env!("CARGO_PKG_VERSION"),
        "message": "Hardware-aware text generation service",
        "endpoints": {
            "GET /health": "readiness of the inference pipeline",
            "GET /hardware": "fresh hardware probe and detected backends",
            "POST /generate": "generate text: {prompt, model_path?, max_new_tokens?}",
        },
    }))
}

pub fn index_router() -> axum::Router<Arc<AppState>> {
    use axum::routing::get;
    axum::Router::new().route("/", get(index))
}
