//! Server error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inferd_hardware::ProbeError;
use inferd_provision::{EngineError, ProvisionError};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by request handlers
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Provisioning(#[from] ProvisionError),

    #[error(transparent)]
    Generation(#[from] EngineError),

    #[error("hardware information unavailable: {0}")]
    HardwareUnavailable(#[from] ProbeError),

    #[error("no inference pipeline is ready")]
    NotReady,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Provisioning(ProvisionError::ShuttingDown) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Provisioning(_)
            | ServerError::Generation(_)
            | ServerError::HardwareUnavailable(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::Provisioning(_) => "PROVISIONING_FAILED",
            ServerError::Generation(_) => "GENERATION_FAILED",
            ServerError::HardwareUnavailable(_) => "HARDWARE_UNAVAILABLE",
            ServerError::NotReady => "NOT_READY",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                "internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(error = %other, code = other.code(), "request failed");
                }
                other.to_string()
            }
        };

        let mut body = json!({
            "error": message,
            "code": self.code(),
        });
        if let ServerError::Provisioning(e) = &self {
            let attempted = e.attempted_backends();
            if !attempted.is_empty() {
                body["attempted_backends"] = json!(attempted);
            }
        }

        (status, Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
