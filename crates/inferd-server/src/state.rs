//! Shared application state for the inference server

use inferd_hardware::HardwareProbe;
use inferd_provision::{BackendPriority, Provisioner};
use std::path::PathBuf;
use std::sync::Arc;

/// Default generation budget when a request omits `max_new_tokens`
pub const DEFAULT_MAX_NEW_TOKENS: usize = 1024;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub provisioner: Provisioner,
    /// Probes the host fresh on every hardware request
    pub probe: Arc<HardwareProbe>,
    /// Backend priority applied to every provisioning call
    pub priority: BackendPriority,
    /// Model used when a request does not name one
    pub default_model: Option<PathBuf>,
    pub default_max_new_tokens: usize,
}

impl AppState {
    pub fn new(provisioner: Provisioner, probe: Arc<HardwareProbe>, priority: BackendPriority) -> Self {
        Self {
            provisioner,
            probe,
            priority,
            default_model: None,
            default_max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<PathBuf>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_default_max_new_tokens(mut self, tokens: usize) -> Self {
        self.default_max_new_tokens = tokens;
        self
    }
}
