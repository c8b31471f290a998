//! Command-line definitions

use clap::{Args, Parser, Subcommand};
use inferd_provision::{InvocationPolicy, ProvisionStrategy};
use inferd_server::ConfigOverrides;
use inferd_server::logging::LogFormat;
use std::path::PathBuf;

/// inferd - hardware-aware text generation service
#[derive(Parser)]
#[command(name = "inferd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "INFERD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve(ServeArgs),

    /// Probe the host and print the hardware report
    Hardware {
        /// Print JSON instead of the text summary
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Default model directory
    #[arg(short, long)]
    pub model_path: Option<PathBuf>,

    /// Comma-separated backend priority, e.g. NPU,GPU,CPU
    #[arg(short, long)]
    pub backends: Option<String>,

    /// Provisioning strategy: sequential or mixed
    #[arg(long)]
    pub strategy: Option<ProvisionStrategy>,

    /// Pipeline invocation policy: serialize or concurrent
    #[arg(long)]
    pub invocation: Option<InvocationPolicy>,

    /// Provision the default model before serving
    #[arg(long)]
    pub eager: bool,

    /// Default max_new_tokens for requests that omit it
    #[arg(long)]
    pub max_new_tokens: Option<usize>,
}

impl From<ServeArgs> for ConfigOverrides {
    fn from(args: ServeArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            model_path: args.model_path,
            backends: args.backends,
            strategy: args.strategy,
            invocation: args.invocation,
            eager: args.eager,
            default_max_new_tokens: args.max_new_tokens,
        }
    }
}
