//! Process environment passed to the inference engine
//!
//! Engines read tuning knobs (thread counts, ISA limits, allocator settings,
//! the composed-target device priority) from environment-style key/value
//! pairs at initialisation time. [`ProcessEnvironment`] holds those pairs as
//! an explicit shared object instead of mutating the real process
//! environment, so the provisioner and engine agree on one injectable store.
//!
//! Writes from provisioning calls with different priority lists overwrite
//! each other; the last writer wins.

use crate::error::EnvError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keys and fixed values for the performance configuration step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Key receiving the comma-joined backend priority for composed targets
    pub priority_key: String,
    /// Key receiving the CPU inference thread count
    pub thread_count_key: String,
    /// Key capping the numeric-kernel instruction set
    pub isa_key: String,
    pub isa_value: String,
    /// Key tuning the memory allocator
    pub allocator_key: String,
    pub allocator_value: String,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            priority_key: "INFERD_DEVICE_PRIORITIES".to_string(),
            thread_count_key: "OMP_NUM_THREADS".to_string(),
            isa_key: "ONEDNN_MAX_CPU_ISA".to_string(),
            isa_value: "ALL".to_string(),
            allocator_key: "MALLOC_ARENA_MAX".to_string(),
            allocator_value: "2".to_string(),
        }
    }
}

/// Shared key/value store read by the engine. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnvironment {
    vars: Arc<RwLock<BTreeMap<String, String>>>,
}

impl ProcessEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), EnvError> {
        if key.is_empty() {
            return Err(EnvError::EmptyKey);
        }
        if key.contains('=') || key.contains('\0') {
            return Err(EnvError::InvalidKey(key.to_string()));
        }
        let value = value.into();
        if value.contains('\0') {
            return Err(EnvError::InvalidValue(key.to_string()));
        }
        self.vars.write().insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.vars.write().remove(key)
    }

    /// Copy of every variable currently set
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars.read().clone()
    }
}
