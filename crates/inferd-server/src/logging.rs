//! Tracing subscriber setup for the `inferd` binary

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "inferd=info,tower_http=info";
const VERBOSE_DIRECTIVE: &str = "inferd=debug,tower_http=debug";

/// Install the global subscriber. `verbose` wins over `RUST_LOG`.
pub fn init(verbose: bool, format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_DIRECTIVE)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}
