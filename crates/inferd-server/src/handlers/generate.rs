//! Text generation endpoint
//!
//! POST /generate - provision (or reuse) the pipeline for a model and run it

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Request body for POST /generate
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
    /// Model directory; falls back to the configured default model
    pub model_path: Option<PathBuf>,
    pub max_new_tokens: Option<i64>,
}

/// Response body for POST /generate
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub generated_text: String,
    pub device: String,
    pub model_path: PathBuf,
    pub max_new_tokens: usize,
    pub duration_ms: u64,
}

/// Validated request, produced before the provisioner is touched
#[derive(Debug, PartialEq, Eq)]
struct GenerateJob {
    prompt: String,
    model_path: PathBuf,
    max_new_tokens: usize,
}

fn validate(req: GenerateRequest, state: &AppState) -> ServerResult<GenerateJob> {
    let prompt = match req.prompt {
        Some(p) if !p.is_empty() => p,
        Some(_) => return Err(ServerError::InvalidRequest("prompt must not be empty".into())),
        None => return Err(ServerError::InvalidRequest("prompt is required".into())),
    };

    let max_new_tokens = match req.max_new_tokens {
        None => state.default_max_new_tokens,
        Some(n) if n > 0 => usize::try_from(n).map_err(|_| {
            ServerError::InvalidRequest(format!("max_new_tokens {n} is too large"))
        })?,
        Some(n) => {
            return Err(ServerError::InvalidRequest(format!(
                "max_new_tokens must be a positive integer, got {n}"
            )));
        }
    };

    let model_path = req
        .model_path
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| state.default_model.clone())
        .ok_or_else(|| {
            ServerError::InvalidRequest(
                "model_path is required when no default model is configured".into(),
            )
        })?;

    Ok(GenerateJob {
        prompt,
        model_path,
        max_new_tokens,
    })
}

/// POST /generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ServerResult<Json<GenerateResponse>> {
    let Json(req) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let job = validate(req, &state)?;

    let started = Instant::now();
    let pipeline = state
        .provisioner
        .provision(&job.model_path, &state.priority)
        .await?;
    let generated_text = pipeline.generate(&job.prompt, job.max_new_tokens).await?;
    let duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
        model = %pipeline.model_path().display(),
        device = %pipeline.device_label(),
        max_new_tokens = job.max_new_tokens,
        duration_ms,
        "generation complete"
    );

    Ok(Json(GenerateResponse {
        generated_text,
        device: pipeline.device_label(),
        model_path: pipeline.model_path().to_path_buf(),
        max_new_tokens: job.max_new_tokens,
        duration_ms,
    }))
}

pub fn generate_router() -> axum::Router<Arc<AppState>> {
    use axum::routing::post;
    axum::Router::new().route("/generate", post(generate))
}
