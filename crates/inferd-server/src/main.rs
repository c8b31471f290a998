//! inferd - hardware-aware text generation service

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, ServeArgs};
use inferd_hardware::{CommandProbeRunner, HardwareProbe};
use inferd_server::{InferdServer, ServiceConfig, bootstrap, logging};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.log_format)
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            let config = config.apply(args.into()).context("invalid command-line options")?;
            serve(config).await
        }
        Command::Hardware { json } => hardware(&config, json).await,
    }
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    tracing::info!(
        addr = %config.bind_addr(),
        backends = %config.backends,
        strategy = %config.strategy,
        model = ?config.model_path,
        "starting inferd"
    );
    let runner = Arc::new(CommandProbeRunner::new(config.probe_timeout()));
    let state = bootstrap(&config, runner).await?;
    InferdServer::new(config.bind_addr(), state)
        .start()
        .await
        .context("server error")
}

async fn hardware(config: &ServiceConfig, json: bool) -> anyhow::Result<()> {
    let runner = Arc::new(CommandProbeRunner::new(config.probe_timeout()));
    let probe = HardwareProbe::new(runner, config.signature_table());
    let report = probe.report().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
