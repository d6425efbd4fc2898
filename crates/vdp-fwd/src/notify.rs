//! Port-state notification bus.

use crate::object::Nid;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vdp_types::OperState;

const BUS_CAPACITY: usize = 1024;

/// A port changed operational state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStateEvent {
    pub port: String,
    pub nid: Nid,
    pub oper: OperState,
}

/// Fan-out of port-state events to any number of subscribers.
#[derive(Debug)]
pub struct NotifyBus {
    tx: broadcast::Sender<PortStateEvent>,
}

impl Default for NotifyBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: PortStateEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes until `cancel` fires.
    pub fn subscribe(&self, cancel: CancellationToken) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            cancel,
        }
    }
}

/// A live subscription; events published before it was taken are not seen.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<PortStateEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Next event, or `None` once cancelled or the bus is gone.
    pub async fn next(&mut self) -> Option<PortStateEvent> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                r = self.rx.recv() => match r {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    /// An already queued event, if any.
    pub fn try_next(&mut self) -> Option<PortStateEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
