//! Daemon lifecycle: engine and switch up, wait for a signal, everything
//! down again.

use crate::config::DaemonConfig;
use crate::error::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vdp_fwd::{Engine, LinkProvider};
use vdp_sai::{PortEvents, Switch};

/// Links of the host: raw sockets on Linux, in-memory devices elsewhere.
pub fn host_links() -> Arc<dyn LinkProvider> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(vdp_fwd::port::AfPacketLinks::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!("no raw socket support on this platform, ports use loopback links");
        Arc::new(vdp_fwd::LoopbackLinks::new())
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                    _ = term.recv() => info!("received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                info!("received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT");
    }
}

async fn log_port_events(mut events: PortEvents) {
    while let Some(event) = events.next().await {
        info!(port = %event.port, status = ?event.status, "port oper status changed");
    }
}

/// A running engine with one switch.
pub struct Daemon {
    engine: Arc<Engine>,
    switch: Switch,
    cancel: CancellationToken,
    watcher: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Daemon {
    /// Boots the engine and the switch. Must run inside a tokio runtime.
    pub fn start(config: &DaemonConfig, links: Arc<dyn LinkProvider>) -> Result<Self> {
        let switch_config = config.switch_config()?;
        let engine = Arc::new(Engine::new(links));
        let switch = Switch::create(engine.clone(), switch_config)?;
        let cancel = CancellationToken::new();
        let events = switch.subscribe_port_events(cancel.clone())?;
        let watcher = tokio::spawn(log_port_events(events));
        info!(
            context = %switch.context(),
            switch = %switch.oid(),
            mac = %config.switch.mac,
            "vdpd started"
        );
        Ok(Self {
            engine,
            switch,
            cancel,
            watcher: Mutex::new(Some(watcher)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn switch(&self) -> &Switch {
        &self.switch
    }

    /// Runs until `shutdown` resolves, then stops.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        shutdown.await;
        self.stop().await
    }

    /// Stops every worker and removes the switch. Stopping twice does
    /// nothing.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(context = %self.switch.context(), "vdpd stopping");
        self.cancel.cancel();
        self.engine.stop();
        self.engine.wait().await;
        let watcher = self.watcher.lock().take();
        if let Some(handle) = watcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "port event watcher failed");
            }
        }
        self.switch.shutdown()?;
        info!("vdpd stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("switch", &self.switch)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
