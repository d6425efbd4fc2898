//! CPU port: punts packets to the control plane.
//!
//! Writes enqueue a [`PuntPacket`] on the port's punt queue; a worker drains
//! the queue into the context's [`PacketSink`]. Each delivery runs under a
//! watchdog so a stuck sink cannot wedge the worker.

use super::queue::{queue, PushError, QueueRx, QueueTx};
use super::{spawn_worker, Port, PortBuilder, PortConfig, PortDriver, PortUpdate};
use crate::context::Context;
use crate::counter::CounterId;
use crate::error::{FwdError, Result};
use crate::field::{FieldId, FieldNum};
use crate::object::Object;
use crate::packet::Packet;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// CPU port settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuPortConfig {
    /// Punt queue length; zero means unbounded.
    pub queue_len: usize,
    /// Budget for one sink delivery, in milliseconds.
    pub watchdog_ms: u64,
    /// Fields exported with every punted packet.
    pub export: Vec<FieldId>,
}

impl Default for CpuPortConfig {
    fn default() -> Self {
        Self {
            queue_len: 1024,
            watchdog_ms: 5000,
            export: Vec::new(),
        }
    }
}

/// Why a packet reached the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuntAction {
    /// Transmitted to a CPU port.
    Transmit,
    /// Sent to a generic-netlink port.
    Genetlink { family: String, group: String },
}

/// A packet delivered to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuntPacket {
    pub context: String,
    pub frame: Vec<u8>,
    /// Id of the ingress port, empty if the packet was injected on egress.
    pub input_port: String,
    pub output_port: String,
    pub action: PuntAction,
    /// The exporting port's configured fields that were present.
    pub fields: Vec<(FieldId, Vec<u8>)>,
}

/// Control-plane receiver of punted packets.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn deliver(&self, punt: PuntPacket) -> Result<()>;
}

/// A sink that forwards punts into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PuntPacket>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PuntPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PacketSink for ChannelSink {
    async fn deliver(&self, punt: PuntPacket) -> Result<()> {
        self.tx
            .send(punt)
            .map_err(|_| FwdError::internal("packet sink receiver dropped"))
    }
}

/// Punt queue plus its worker; shared by CPU and generic-netlink ports.
pub(super) struct Punter {
    export: RwLock<Vec<FieldId>>,
    watchdog: Duration,
    queue: QueueTx<PuntPacket>,
    rx: Mutex<Option<QueueRx<PuntPacket>>>,
}

impl Punter {
    pub(super) fn new(queue_len: usize, watchdog: Duration, export: Vec<FieldId>) -> Self {
        let (tx, rx) = queue(queue_len);
        Self {
            export: RwLock::new(export),
            watchdog,
            queue: tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(super) fn set_export(&self, export: Vec<FieldId>) {
        *self.export.write() = export;
    }

    fn port_name(ctx: &Context, pkt: &Packet, num: FieldNum) -> String {
        match pkt.metadata_u64(num) {
            0 => String::new(),
            nid => ctx.port_by_nid(nid).map(|p| p.id().to_string()).unwrap_or_default(),
        }
    }

    pub(super) fn punt(&self, port: &Port, pkt: Packet, action: PuntAction) -> Result<()> {
        let ctx = port
            .context()
            .ok_or_else(|| FwdError::failed_precondition("context is gone"))?;
        let fields = self
            .export
            .read()
            .iter()
            .filter_map(|f| pkt.field(f).ok().map(|v| (*f, v)))
            .collect();
        let punt = PuntPacket {
            context: ctx.name().to_string(),
            frame: pkt.frame(),
            input_port: Self::port_name(&ctx, &pkt, FieldNum::PacketPortInput),
            output_port: Self::port_name(&ctx, &pkt, FieldNum::PacketPortOutput),
            action,
            fields,
        };
        let len = punt.frame.len();
        match self.queue.push(punt) {
            Ok(()) => Ok(()),
            Err(PushError::Full) => {
                port.base().counters().increment(CounterId::TxDrop, len);
                debug!(port = %port.id(), "punt queue full, dropping");
                Ok(())
            }
            Err(PushError::Closed) => Err(FwdError::failed_precondition("punt queue closed")),
        }
    }

    pub(super) fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        let mut rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| FwdError::failed_precondition("punt worker already started"))?;
        let weak_port = Arc::downgrade(port);
        let weak_ctx = Arc::downgrade(ctx);
        let cancel = port.cancel_token().clone();
        let watchdog = self.watchdog;
        spawn_worker(ctx, async move {
            loop {
                let punt = tokio::select! {
                    _ = cancel.cancelled() => break,
                    p = rx.recv() => match p {
                        Some(p) => p,
                        None => break,
                    },
                };
                let (Some(ctx), Some(port)) = (weak_ctx.upgrade(), weak_port.upgrade()) else {
                    break;
                };
                let len = punt.frame.len();
                let Some(sink) = ctx.sink() else {
                    port.base().counters().increment(CounterId::TxDrop, len);
                    debug!(port = %port.id(), "no packet sink, dropping punt");
                    continue;
                };
                match tokio::time::timeout(watchdog, sink.deliver(punt)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        port.base().counters().increment(CounterId::TxError, len);
                        warn!(port = %port.id(), error = %e, "packet sink delivery failed");
                    }
                    Err(_) => {
                        port.base().counters().increment(CounterId::TxError, len);
                        warn!(port = %port.id(), budget_ms = watchdog.as_millis() as u64, "packet sink stalled, punt abandoned");
                    }
                }
            }
            debug!("punt worker stopped");
        })
    }
}

struct CpuDriver {
    punter: Punter,
    queue_len: usize,
}

impl PortDriver for CpuDriver {
    fn write(&self, port: &Port, pkt: Packet) -> Result<()> {
        self.punter.punt(port, pkt, PuntAction::Transmit)
    }

    fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        self.punter.start(port, ctx)
    }

    fn update(&self, port: &Port, _ctx: &Arc<Context>, update: &PortUpdate) -> Result<()> {
        match update {
            PortUpdate::CpuExport(fields) => {
                self.punter.set_export(fields.clone());
                Ok(())
            }
            other => Err(FwdError::invalid_argument(format!(
                "{} update not supported by cpu port {}",
                other,
                port.id()
            ))),
        }
    }

    fn describe(&self) -> String {
        let export: Vec<String> = self.punter.export.read().iter().map(|f| f.to_string()).collect();
        format!("queue {} export [{}]", self.queue_len, export.join(", "))
    }
}

pub(super) struct CpuBuilder;

impl PortBuilder for CpuBuilder {
    fn build(&self, _ctx: &Arc<Context>, _id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Cpu(cfg) = config else {
            return Err(FwdError::invalid_argument("cpu builder given a non-cpu config"));
        };
        Ok(Box::new(CpuDriver {
            punter: Punter::new(cfg.queue_len, Duration::from_millis(cfg.watchdog_ms), cfg.export.clone()),
            queue_len: cfg.queue_len,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::packet::tests::udp4_frame;
    use crate::packet::HeaderId;
    use crate::port::{input, LoopbackLinks, PortBuilders, PortDesc};
    use pretty_assertions::assert_eq;

    struct StuckSink;

    #[async_trait]
    impl PacketSink for StuckSink {
        async fn deliver(&self, _punt: PuntPacket) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn setup(cfg: CpuPortConfig) -> (Arc<Context>, Arc<Port>, Arc<Port>) {
        let ctx = Context::new("cpu", Arc::new(LoopbackLinks::new()));
        let builders = PortBuilders::with_defaults();
        let cpu = builders.create(&ctx, PortDesc::new("cpu", PortConfig::Cpu(cfg))).unwrap();
        let eth = builders
            .create(
                &ctx,
                PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() })
                    .with_input(vec![Action::transmit("cpu")]),
            )
            .unwrap();
        (ctx, cpu, eth)
    }

    #[tokio::test]
    async fn test_punt_carries_ports_and_exported_fields() {
        let cfg = CpuPortConfig {
            export: vec![FieldNum::IpProto.into(), FieldNum::MplsLabel.into()],
            ..Default::default()
        };
        let (ctx, _cpu, eth) = setup(cfg);
        let (sink, mut rx) = ChannelSink::new();
        ctx.set_sink(Arc::new(sink));

        input(&ctx, &eth, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        let punt = rx.recv().await.unwrap();
        assert_eq!(punt.input_port, "eth1");
        assert_eq!(punt.output_port, "cpu");
        assert_eq!(punt.action, PuntAction::Transmit);
        assert_eq!(punt.frame, udp4_frame());
        // MPLS_LABEL is absent and skipped.
        assert_eq!(punt.fields, vec![(FieldId::from(FieldNum::IpProto), vec![17])]);
        ctx.stop();
    }

    #[tokio::test]
    async fn test_stalled_sink_counts_tx_error() {
        let cfg = CpuPortConfig {
            watchdog_ms: 20,
            ..Default::default()
        };
        let (ctx, cpu, eth) = setup(cfg);
        ctx.set_sink(Arc::new(StuckSink));

        input(&ctx, &eth, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        for _ in 0..100 {
            if cpu.base().counters().packets(CounterId::TxError) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cpu.base().counters().packets(CounterId::TxError), 1);
        ctx.stop();
    }

    #[tokio::test]
    async fn test_export_update() {
        let (ctx, cpu, _eth) = setup(CpuPortConfig::default());
        cpu.update(&ctx, PortUpdate::CpuExport(vec![FieldNum::EtherType.into()]))
            .unwrap();
        assert!(cpu.describe().contains("ETHER_TYPE"));
        assert!(cpu
            .update(&ctx, PortUpdate::AggregateRemove("x".into()))
            .is_err());
        ctx.stop();
    }
}
