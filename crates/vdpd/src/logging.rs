//! Logging bootstrap.

use crate::error::{DaemonError, Result};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, `level` otherwise.
pub fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| DaemonError::Config(format!("log level {:?}: {}", level, e))),
    }
}

/// Installs the global fmt subscriber, as JSON lines if `json` is set.
pub fn init(level: &str, json: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| DaemonError::Logging(e.to_string()))
}
