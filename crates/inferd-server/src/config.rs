//! Service configuration
//!
//! Layers, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional config file (TOML, YAML or JSON, picked by extension)
//! 3. `INFERD_*` environment variables (`INFERD_PORT`, `INFERD_BACKENDS`,
//!    nested keys with `__`, e.g. `INFERD_PERFORMANCE__ALLOCATOR_VALUE`)
//! 4. command-line flags, applied with [`ServiceConfig::apply`]

use config::{Config, Environment, File};
use inferd_hardware::{DEFAULT_PROBE_TIMEOUT, SignatureError, SignatureTable};
use inferd_provision::{
    BackendPriority, InvocationPolicy, PerformanceConfig, ProvisionStrategy, ProvisionerConfig,
    resolve_str,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::state::DEFAULT_MAX_NEW_TOKENS;

pub const ENV_PREFIX: &str = "INFERD";

/// Configuration could not be loaded or is invalid
#[derive(Debug, Error)]
pub enum ServiceConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid backend priority: {0}")]
    Priority(#[from] inferd_provision::ConfigError),

    #[error("invalid signature table: {0}")]
    Signatures(#[from] SignatureError),

    #[error("default_max_new_tokens must be positive")]
    ZeroMaxTokens,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Default model directory for requests that do not name one
    pub model_path: Option<PathBuf>,
    /// Comma-separated backend priority, e.g. `NPU,GPU,CPU`
    pub backends: String,
    pub strategy: ProvisionStrategy,
    pub invocation: InvocationPolicy,
    /// Provision the default model before accepting traffic
    pub eager: bool,
    pub default_max_new_tokens: usize,
    pub probe_timeout_secs: u64,
    /// Replaces the built-in device signature table when set
    pub signatures: Option<SignatureTable>,
    pub performance: PerformanceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            model_path: None,
            backends: "CPU".to_string(),
            strategy: ProvisionStrategy::default(),
            invocation: InvocationPolicy::default(),
            eager: false,
            default_max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            signatures: None,
            performance: PerformanceConfig::default(),
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model_path: Option<PathBuf>,
    pub backends: Option<String>,
    pub strategy: Option<ProvisionStrategy>,
    pub invocation: Option<InvocationPolicy>,
    pub eager: bool,
    pub default_max_new_tokens: Option<usize>,
}

impl ServiceConfig {
    /// Load defaults, the optional file and `INFERD_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ServiceConfigError> {
        Self::load_with_env(file, env_source())
    }

    pub fn load_with_env(
        file: Option<&Path>,
        env: Environment,
    ) -> Result<Self, ServiceConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&ServiceConfig::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: ServiceConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides, then re-validate.
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, ServiceConfigError> {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(model_path) = overrides.model_path {
            self.model_path = Some(model_path);
        }
        if let Some(backends) = overrides.backends {
            self.backends = backends;
        }
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(invocation) = overrides.invocation {
            self.invocation = invocation;
        }
        if overrides.eager {
            self.eager = true;
        }
        if let Some(tokens) = overrides.default_max_new_tokens {
            self.default_max_new_tokens = tokens;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ServiceConfigError> {
        self.priority()?;
        self.signature_table().validate()?;
        if self.default_max_new_tokens == 0 {
            return Err(ServiceConfigError::ZeroMaxTokens);
        }
        Ok(())
    }

    pub fn priority(&self) -> Result<BackendPriority, ServiceConfigError> {
        Ok(resolve_str(&self.backends)?)
    }

    pub fn signature_table(&self) -> SignatureTable {
        self.signatures.clone().unwrap_or_default()
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig::new()
            .with_strategy(self.strategy)
            .with_invocation(self.invocation)
            .with_performance(self.performance.clone())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
