//! Command line.

use crate::config::DaemonConfig;
use clap::Parser;
use std::path::PathBuf;

/// Virtual dataplane daemon
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vdpd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Name of the switch's forwarding context
    #[arg(long)]
    pub context: Option<String>,
}

impl Args {
    /// Overrides file values with the ones given on the command line.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.json_logs {
            config.log.json = true;
        }
        if let Some(context) = &self.context {
            config.switch.context = context.clone();
        }
    }
}
