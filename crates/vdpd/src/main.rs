//! vdpd entry point.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use vdpd::{host_links, logging, shutdown_signal, Args, Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "vdpd failed");
            eprintln!("vdpd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = DaemonConfig::load_or_default(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate().context("validating configuration")?;
    logging::init(&config.log.level, config.log.json)?;

    let daemon = Daemon::start(&config, host_links()).context("starting switch")?;
    daemon.run_until(shutdown_signal()).await?;
    Ok(())
}
