//! `inferd-server` - HTTP front end for hardware-aware text generation.
//!
//! Wires the probe and classifier from `inferd-hardware` and the provisioner
//! from `inferd-provision` into an axum service. See [`server`] for the
//! endpoint table.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use inferd_hardware::CommandProbeRunner;
//! use inferd_server::{InferdServer, ServiceConfig, bootstrap};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load(None)?;
//!     let runner = Arc::new(CommandProbeRunner::new(config.probe_timeout()));
//!     let state = bootstrap(&config, runner).await?;
//!     InferdServer::new(config.bind_addr(), state).start().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod state;

pub use config::{ConfigOverrides, ServiceConfig, ServiceConfigError};
pub use error::{ServerError, ServerResult};
pub use server::{InferdServer, bootstrap, build_router};
pub use state::{AppState, DEFAULT_MAX_NEW_TOKENS};
