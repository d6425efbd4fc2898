//! Daemon errors.

use thiserror::Error;
use vdp_sai::SaiError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Sai(#[from] SaiError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
