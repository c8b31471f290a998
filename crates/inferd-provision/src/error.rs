//! Provisioning error types

use inferd_hardware::BackendKind;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid service configuration, fatal at startup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("backend priority list is empty")]
    EmptyPriority,

    #[error("unknown provisioning strategy '{0}' (expected 'sequential' or 'mixed')")]
    UnknownStrategy(String),

    #[error("unknown invocation policy '{0}' (expected 'serialize' or 'concurrent')")]
    UnknownInvocationPolicy(String),
}

/// A process environment write was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("environment key must not be empty")]
    EmptyKey,

    #[error("environment key '{0}' contains '=' or a NUL byte")]
    InvalidKey(String),

    #[error("value for '{0}' contains a NUL byte")]
    InvalidValue(String),
}

/// Errors reported by an inference engine binding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("model directory not found: {0}")]
    ModelNotFound(String),

    #[error("backend {backend} is unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    #[error("engine initialisation failed: {0}")]
    InitFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

/// One failed initialisation attempt during sequential fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendAttempt {
    pub backend: BackendKind,
    pub error: String,
}

impl fmt::Display for BackendAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

pub(crate) fn format_attempts(attempts: &[BackendAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a provisioning call.
///
/// `Clone` so every caller waiting on the same in-flight initialisation
/// receives the identical failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProvisionError {
    #[error("invalid model path '{path}': {reason}")]
    InvalidModelPath { path: String, reason: String },

    #[error("every backend failed for {}: [{}]", .model.display(), format_attempts(.attempts))]
    BackendExhausted {
        model: PathBuf,
        attempts: Vec<BackendAttempt>,
    },

    #[error("mixed target over [{hint}] failed for {}: {error}", .model.display())]
    MixedInit {
        model: PathBuf,
        hint: String,
        error: EngineError,
    },

    #[error("provisioner is shutting down")]
    ShuttingDown,

    #[error("internal provisioning error: {0}")]
    Internal(String),
}

impl ProvisionError {
    /// Backends that were tried before giving up.
    pub fn attempted_backends(&self) -> Vec<BackendKind> {
        match self {
            ProvisionError::BackendExhausted { attempts, .. } => {
                attempts.iter().map(|a| a.backend.clone()).collect()
            }
            ProvisionError::MixedInit { .. } => vec![BackendKind::Mixed],
            _ => Vec::new(),
        }
    }
}
