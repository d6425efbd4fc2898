//! The virtual dataplane daemon.
//!
//! Loads a [`DaemonConfig`], installs logging, boots a
//! [`vdp_fwd::Engine`] with one [`vdp_sai::Switch`] and runs until
//! SIGINT or SIGTERM.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;

pub use cli::Args;
pub use config::DaemonConfig;
pub use daemon::{host_links, shutdown_signal, Daemon};
pub use error::{DaemonError, Result};
