//! Ports and the packet input/output paths.
//!
//! A port couples a type-specific [`PortDriver`] with the shared object
//! state every port has: counters, admin and oper state, and the input and
//! output action lists. Packets enter through [`input`] (or [`receive`] for
//! raw frames), run the input actions and leave through [`output`] on the
//! port named by `PACKET_PORT_OUTPUT`.

mod aggregate;
mod cpu;
mod fake;
mod genetlink;
mod hostif;
mod kernel;
mod queue;
mod tap;

pub use aggregate::{AggregateConfig, AggregateMember, AggregatePort};
pub use cpu::{ChannelSink, CpuPortConfig, PacketSink, PuntAction, PuntPacket};
#[cfg(target_os = "linux")]
pub use kernel::AfPacketLinks;
pub use kernel::{Link, LinkPeer, LinkProvider, LoopbackLinks};

use crate::action::{self, Action, Verdict};
use crate::context::{Context, FwdObject};
use crate::counter::{CounterId, PORT_COUNTERS};
use crate::error::{FwdError, Result};
use crate::field::{FieldId, FieldNum};
use crate::hash::HashAlgorithm;
use crate::notify::PortStateEvent;
use crate::object::{Nid, Object, ObjectBase, ObjectKind};
use crate::packet::{HeaderId, Packet};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vdp_types::{AdminState, OperState};

/// Port type tag; the builder registry is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Cpu,
    Kernel,
    Tap,
    Fake,
    Aggregate,
    Genetlink,
    Hostif,
}

impl PortType {
    pub const ALL: [PortType; 7] = [
        PortType::Cpu,
        PortType::Kernel,
        PortType::Tap,
        PortType::Fake,
        PortType::Aggregate,
        PortType::Genetlink,
        PortType::Hostif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PortType::Cpu => "cpu",
            PortType::Kernel => "kernel",
            PortType::Tap => "tap",
            PortType::Fake => "fake",
            PortType::Aggregate => "aggregate",
            PortType::Genetlink => "genetlink",
            PortType::Hostif => "hostif",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortType {
    type Err = FwdError;

    fn from_str(s: &str) -> Result<Self> {
        PortType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FwdError::invalid_argument(format!("unknown port type: {}", s)))
    }
}

/// Type-specific port configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortConfig {
    Cpu(CpuPortConfig),
    /// A host network device, opened through the context's link provider.
    Kernel { device: String },
    /// A TAP device node or any other path opened read-write.
    Tap { path: PathBuf },
    /// Replays `input` (pcap or pcapng) and records transmitted frames to
    /// `output` (pcap).
    Fake {
        input: Option<PathBuf>,
        output: Option<PathBuf>,
    },
    Aggregate(AggregateConfig),
    Genetlink { family: String, group: String },
    /// Logical attachment to another port of the same context.
    Hostif { port: String },
}

impl PortConfig {
    pub fn port_type(&self) -> PortType {
        match self {
            PortConfig::Cpu(_) => PortType::Cpu,
            PortConfig::Kernel { .. } => PortType::Kernel,
            PortConfig::Tap { .. } => PortType::Tap,
            PortConfig::Fake { .. } => PortType::Fake,
            PortConfig::Aggregate(_) => PortType::Aggregate,
            PortConfig::Genetlink { .. } => PortType::Genetlink,
            PortConfig::Hostif { .. } => PortType::Hostif,
        }
    }
}

/// Everything needed to create a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDesc {
    /// Assigned from the NID when absent.
    pub id: Option<String>,
    pub config: PortConfig,
    #[serde(default = "default_admin")]
    pub admin: AdminState,
    #[serde(default)]
    pub input_actions: Vec<Action>,
    #[serde(default)]
    pub output_actions: Vec<Action>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

fn default_admin() -> AdminState {
    AdminState::Up
}

impl PortDesc {
    pub fn new(id: impl Into<String>, config: PortConfig) -> Self {
        Self {
            id: Some(id.into()),
            config,
            admin: AdminState::Up,
            input_actions: Vec::new(),
            output_actions: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_input(mut self, actions: Vec<Action>) -> Self {
        self.input_actions = actions;
        self
    }

    pub fn with_output(mut self, actions: Vec<Action>) -> Self {
        self.output_actions = actions;
        self
    }

    pub fn with_admin(mut self, admin: AdminState) -> Self {
        self.admin = admin;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A change to an existing port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortUpdate {
    Admin(AdminState),
    InputActions(Vec<Action>),
    OutputActions(Vec<Action>),
    CpuExport(Vec<FieldId>),
    AggregateAlgorithm(HashAlgorithm),
    AggregateHashFields(Vec<FieldId>),
    AggregateAdd(AggregateMember),
    AggregateRemove(String),
    AggregateReplace(Vec<AggregateMember>),
    /// Pairs this (external) port with an internal port for
    /// `SwapOutputInternalExternal`.
    PairInternal(String),
}

impl fmt::Display for PortUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortUpdate::Admin(_) => "admin",
            PortUpdate::InputActions(_) => "input-actions",
            PortUpdate::OutputActions(_) => "output-actions",
            PortUpdate::CpuExport(_) => "cpu-export",
            PortUpdate::AggregateAlgorithm(_) => "aggregate-algorithm",
            PortUpdate::AggregateHashFields(_) => "aggregate-hash-fields",
            PortUpdate::AggregateAdd(_) => "aggregate-add",
            PortUpdate::AggregateRemove(_) => "aggregate-remove",
            PortUpdate::AggregateReplace(_) => "aggregate-replace",
            PortUpdate::PairInternal(_) => "pair-internal",
        };
        f.write_str(name)
    }
}

/// Type-specific half of a port.
pub trait PortDriver: Send + Sync + 'static {
    /// Sends a packet that finished the output path.
    fn write(&self, port: &Port, pkt: Packet) -> Result<()>;

    /// Whether the underlying link is up.
    fn link_up(&self, _ctx: &Context) -> bool {
        true
    }

    /// Starts background workers. Called once, after registration.
    fn start(&self, _port: &Arc<Port>, _ctx: &Arc<Context>) -> Result<()> {
        Ok(())
    }

    /// Applies a type-specific update.
    fn update(&self, port: &Port, _ctx: &Arc<Context>, update: &PortUpdate) -> Result<()> {
        Err(FwdError::invalid_argument(format!(
            "{} update not supported by {} port {}",
            update,
            port.port_type(),
            port.id()
        )))
    }

    /// Releases driver resources. Workers also observe the port's cancel
    /// token.
    fn stop(&self) {}

    fn as_aggregate(&self) -> Option<&AggregatePort> {
        None
    }

    /// One-line description for debugging output.
    fn describe(&self) -> String;
}

/// Creates the driver for one port type.
pub trait PortBuilder: Send + Sync {
    fn build(&self, ctx: &Arc<Context>, id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>>;
}

/// Registry of port builders keyed by port type.
#[derive(Clone, Default)]
pub struct PortBuilders {
    builders: Arc<DashMap<PortType, Arc<dyn PortBuilder>>>,
}

impl PortBuilders {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a builder for every built-in port type.
    pub fn with_defaults() -> Self {
        let b = Self::new();
        b.register(PortType::Cpu, Arc::new(cpu::CpuBuilder));
        b.register(PortType::Kernel, Arc::new(kernel::KernelBuilder));
        b.register(PortType::Tap, Arc::new(tap::TapBuilder));
        b.register(PortType::Fake, Arc::new(fake::FakeBuilder));
        b.register(PortType::Aggregate, Arc::new(aggregate::AggregateBuilder));
        b.register(PortType::Genetlink, Arc::new(genetlink::GenetlinkBuilder));
        b.register(PortType::Hostif, Arc::new(hostif::HostifBuilder));
        b
    }

    /// Registers (or replaces) the builder for `port_type`.
    pub fn register(&self, port_type: PortType, builder: Arc<dyn PortBuilder>) {
        self.builders.insert(port_type, builder);
    }

    pub fn is_registered(&self, port_type: PortType) -> bool {
        self.builders.contains_key(&port_type)
    }

    /// Builds, registers and starts a port.
    pub fn create(&self, ctx: &Arc<Context>, desc: PortDesc) -> Result<Arc<Port>> {
        let port_type = desc.config.port_type();
        let builder = self
            .builders
            .get(&port_type)
            .map(|b| b.value().clone())
            .ok_or_else(|| FwdError::unimplemented(format!("no builder for {} ports", port_type)))?;
        action::validate(ctx, &desc.input_actions)?;
        action::validate(ctx, &desc.output_actions)?;

        let base = ctx.new_base(desc.id.as_deref(), ObjectKind::Port, PORT_COUNTERS)?;
        if ctx.get(base.id()).is_ok() {
            return Err(FwdError::invalid_argument(format!(
                "object {} already exists in {}",
                base.id(),
                ctx.name()
            )));
        }
        let driver = builder.build(ctx, base.id(), &desc.config)?;
        let port = Arc::new(Port {
            base,
            port_type,
            input: RwLock::new(desc.input_actions.into()),
            output: RwLock::new(desc.output_actions.into()),
            admin: RwLock::new(desc.admin),
            oper: Mutex::new(OperState::Down),
            driver,
            cancel: ctx.cancel_token().child_token(),
            ctx: ctx.weak(),
        });
        ctx.insert(FwdObject::Port(port.clone()))?;
        for (k, v) in desc.attributes {
            ctx.set_attribute(port.id(), k, v);
        }
        if let Err(e) = port.driver.start(&port, ctx) {
            ctx.release(port.nid());
            return Err(e);
        }
        port.refresh_oper();
        info!(context = %ctx.name(), port = %port.id(), nid = port.nid(), kind = %port_type, "port created");
        Ok(port)
    }
}

impl fmt::Debug for PortBuilders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<PortType> = self.builders.iter().map(|e| *e.key()).collect();
        types.sort_by_key(|t| t.as_str());
        f.debug_struct("PortBuilders").field("types", &types).finish()
    }
}

/// A port object.
pub struct Port {
    base: ObjectBase,
    port_type: PortType,
    input: RwLock<Arc<[Action]>>,
    output: RwLock<Arc<[Action]>>,
    admin: RwLock<AdminState>,
    oper: Mutex<OperState>,
    driver: Box<dyn PortDriver>,
    cancel: CancellationToken,
    ctx: Weak<Context>,
}

impl Port {
    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn nid(&self) -> Nid {
        self.base.nid()
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn admin_state(&self) -> AdminState {
        *self.admin.read()
    }

    pub fn oper_state(&self) -> OperState {
        *self.oper.lock()
    }

    pub fn input_actions(&self) -> Arc<[Action]> {
        self.input.read().clone()
    }

    pub fn output_actions(&self) -> Arc<[Action]> {
        self.output.read().clone()
    }

    pub fn aggregate(&self) -> Option<&AggregatePort> {
        self.driver.as_aggregate()
    }

    pub fn describe(&self) -> String {
        format!("{} {} ({})", self.port_type, self.id(), self.driver.describe())
    }

    pub(crate) fn context(&self) -> Option<Arc<Context>> {
        self.ctx.upgrade()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_admin(&self, state: AdminState) {
        *self.admin.write() = state;
        self.refresh_oper();
    }

    /// Recomputes oper state from admin state and link state, publishing a
    /// notification when it changes. A change is passed on to the aggregates
    /// this port is a member of.
    pub fn refresh_oper(&self) {
        let Some(ctx) = self.context() else {
            return;
        };
        let up = self.admin_state().is_up() && self.driver.link_up(&ctx);
        let state = OperState::from(up);
        {
            let mut oper = self.oper.lock();
            if *oper == state {
                return;
            }
            *oper = state;
        }
        info!(context = %ctx.name(), port = %self.id(), oper = %state, "port oper state changed");
        ctx.notify().publish(PortStateEvent {
            port: self.id().to_string(),
            nid: self.nid(),
            oper: state,
        });
        // Aggregates are up while any member is.
        for obj in ctx.objects() {
            if let FwdObject::Port(p) = obj {
                if p.aggregate().is_some_and(|a| a.has_member(self.id())) {
                    p.refresh_oper();
                }
            }
        }
    }

    /// Applies a control-plane update.
    pub fn update(&self, ctx: &Arc<Context>, update: PortUpdate) -> Result<()> {
        debug!(context = %ctx.name(), port = %self.id(), update = %update, "port update");
        match update {
            PortUpdate::Admin(state) => self.set_admin(state),
            PortUpdate::InputActions(actions) => {
                action::validate(ctx, &actions)?;
                *self.input.write() = actions.into();
            }
            PortUpdate::OutputActions(actions) => {
                action::validate(ctx, &actions)?;
                *self.output.write() = actions.into();
            }
            PortUpdate::PairInternal(internal) => {
                let internal = ctx.port(&internal)?;
                ctx.pair_ports(self.nid(), internal.nid());
            }
            other => {
                self.driver.update(self, ctx, &other)?;
                self.refresh_oper();
            }
        }
        Ok(())
    }
}

impl Object for Port {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn cleanup(&self) {
        self.cancel.cancel();
        self.driver.stop();
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id())
            .field("nid", &self.nid())
            .field("type", &self.port_type)
            .field("admin", &self.admin_state())
            .field("oper", &self.oper_state())
            .finish()
    }
}

/// Spawns a port worker on the context's task tracker. Fails outside a
/// tokio runtime instead of panicking.
pub(crate) fn spawn_worker<F>(ctx: &Context, fut: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| FwdError::failed_precondition("port workers need a tokio runtime"))?;
    ctx.tasks().spawn_on(fut, &handle);
    Ok(())
}

fn is_multicast(pkt: &Packet, num: FieldNum) -> bool {
    pkt.field(&num.into())
        .ok()
        .and_then(|mac| mac.first().copied())
        .is_some_and(|b| b & 1 == 1)
}

/// Emits and returns the packet trace.
fn finish(port: &Port, pkt: &mut Packet) -> Vec<String> {
    let lines = pkt.take_log();
    for line in &lines {
        trace!(port = %port.id(), "{}", line);
    }
    lines
}

/// Parses a raw frame received on `port` and runs it through [`input`].
/// Frames that fail to parse are counted and dropped.
pub fn receive(ctx: &Arc<Context>, port: &Arc<Port>, frame: &[u8]) -> Vec<String> {
    match Packet::parse(HeaderId::Ethernet, frame) {
        Ok(pkt) => input(ctx, port, pkt),
        Err(e) => {
            port.base.counters().increment(CounterId::RxBadPackets, frame.len());
            debug!(port = %port.id(), error = %e, "dropping unparsable frame");
            Vec::new()
        }
    }
}

/// The ingress path. Returns the packet trace (empty unless tracing).
pub fn input(ctx: &Arc<Context>, port: &Arc<Port>, mut pkt: Packet) -> Vec<String> {
    let len = pkt.length();
    let counters = port.base.counters();
    counters.increment(CounterId::RxPackets, len);
    pkt.set_attributes(ctx.packet_attributes(port.id()));
    pkt.log(|| format!("input {}", port.id()));
    if !port.admin_state().is_up() {
        counters.increment(CounterId::RxAdminDrop, len);
        pkt.log(|| "admin down, dropped".to_string());
        return finish(port, &mut pkt);
    }
    pkt.set_metadata_u64(FieldNum::PacketPortInput, port.nid());
    if is_multicast(&pkt, FieldNum::EtherMacDst) {
        counters.increment(CounterId::RxNonUnicast, len);
    } else {
        counters.increment(CounterId::RxUnicast, len);
    }

    let actions = port.input_actions();
    match action::execute(ctx, &actions, &mut pkt) {
        Verdict::Drop => {
            counters.increment(CounterId::RxDrop, len);
            pkt.log(|| "dropped".to_string());
            finish(port, &mut pkt)
        }
        Verdict::Consume => finish(port, &mut pkt),
        Verdict::Continue | Verdict::Output => {
            let out = pkt.metadata_u64(FieldNum::PacketPortOutput);
            match ctx.port_by_nid(out) {
                Ok(out) => output(ctx, &out, pkt),
                Err(_) => {
                    counters.increment(CounterId::RxDrop, len);
                    pkt.log(|| "no output port, dropped".to_string());
                    finish(port, &mut pkt)
                }
            }
        }
    }
}

/// The egress path. Returns the packet trace (empty unless tracing).
pub fn output(ctx: &Arc<Context>, port: &Arc<Port>, mut pkt: Packet) -> Vec<String> {
    let len = pkt.length();
    let counters = port.base.counters();
    counters.increment(CounterId::TxPackets, len);
    pkt.log(|| format!("output {}", port.id()));
    if !port.admin_state().is_up() {
        counters.increment(CounterId::TxAdminDrop, len);
        pkt.log(|| "admin down, dropped".to_string());
        return finish(port, &mut pkt);
    }
    pkt.set_metadata_u64(FieldNum::PacketPortOutput, port.nid());
    if is_multicast(&pkt, FieldNum::EtherMacSrc) {
        counters.increment(CounterId::TxNonUnicast, len);
    } else {
        counters.increment(CounterId::TxUnicast, len);
    }

    let actions = port.output_actions();
    match action::execute(ctx, &actions, &mut pkt) {
        Verdict::Drop => {
            counters.increment(CounterId::TxDrop, len);
            pkt.log(|| "dropped".to_string());
            finish(port, &mut pkt)
        }
        Verdict::Consume => finish(port, &mut pkt),
        Verdict::Continue | Verdict::Output => {
            pkt.log(|| format!("write {}", port.id()));
            let lines = finish(port, &mut pkt);
            if let Err(e) = port.driver.write(port, pkt) {
                counters.increment(CounterId::TxError, len);
                warn!(context = %ctx.name(), port = %port.id(), error = %e, "port write failed");
            }
            lines
        }
    }
}

/// Sends a packet to the port named by its `PACKET_PORT_OUTPUT`.
pub(crate) fn forward(ctx: &Arc<Context>, mut pkt: Packet) -> Vec<String> {
    let out = pkt.metadata_u64(FieldNum::PacketPortOutput);
    match ctx.port_by_nid(out) {
        Ok(port) => output(ctx, &port, pkt),
        Err(_) => {
            debug!(context = %ctx.name(), nid = out, "no output port, dropping copy");
            pkt.log(|| "no output port, dropped".to_string());
            pkt.take_log()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tests::udp4_frame;
    use pretty_assertions::assert_eq;

    fn ctx() -> (Arc<Context>, LoopbackLinks) {
        let links = LoopbackLinks::new();
        (Context::new("ports", Arc::new(links.clone())), links)
    }

    fn kernel(id: &str) -> PortDesc {
        PortDesc::new(id, PortConfig::Kernel { device: id.to_string() })
    }

    #[test]
    fn test_port_type_parse() {
        assert_eq!("CPU".parse::<PortType>().unwrap(), PortType::Cpu);
        assert_eq!(PortType::Aggregate.to_string(), "aggregate");
        assert!("bogus".parse::<PortType>().is_err());
    }

    #[tokio::test]
    async fn test_forward_between_kernel_ports() {
        let (ctx, links) = ctx();
        let builders = PortBuilders::with_defaults();
        let eth1 = builders.create(&ctx, kernel("eth1")).unwrap();
        let eth2 = builders.create(&ctx, kernel("eth2")).unwrap();
        eth1.update(&ctx, PortUpdate::InputActions(vec![Action::transmit("eth2")]))
            .unwrap();

        input(&ctx, &eth1, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        let sent = links.peer("eth2").try_recv().unwrap();
        assert_eq!(sent, udp4_frame());
        assert_eq!(eth1.base().counters().packets(CounterId::RxPackets), 1);
        assert_eq!(eth1.base().counters().packets(CounterId::RxUnicast), 1);
        assert_eq!(eth2.base().counters().packets(CounterId::TxPackets), 1);
        ctx.stop();
    }

    #[tokio::test]
    async fn test_missing_output_port_counts_drop() {
        let (ctx, _links) = ctx();
        let builders = PortBuilders::with_defaults();
        let eth1 = builders.create(&ctx, kernel("eth1")).unwrap();
        input(&ctx, &eth1, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        assert_eq!(eth1.base().counters().packets(CounterId::RxDrop), 1);
        ctx.stop();
    }

    #[tokio::test]
    async fn test_admin_down_drops_and_notifies() {
        let (ctx, _links) = ctx();
        let builders = PortBuilders::with_defaults();
        let eth1 = builders.create(&ctx, kernel("eth1")).unwrap();
        assert_eq!(eth1.oper_state(), OperState::Up);

        let mut sub = ctx.notify().subscribe(CancellationToken::new());
        eth1.update(&ctx, PortUpdate::Admin(AdminState::Down)).unwrap();
        let event = sub.try_next().unwrap();
        assert_eq!(event.port, "eth1");
        assert_eq!(event.oper, OperState::Down);
        assert!(sub.try_next().is_none());

        input(&ctx, &eth1, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        assert_eq!(eth1.base().counters().packets(CounterId::RxAdminDrop), 1);
        ctx.stop();
    }

    #[tokio::test]
    async fn test_unparsable_frame_counted() {
        let (ctx, _links) = ctx();
        let builders = PortBuilders::with_defaults();
        let eth1 = builders.create(&ctx, kernel("eth1")).unwrap();
        receive(&ctx, &eth1, &[0u8; 5]);
        assert_eq!(eth1.base().counters().packets(CounterId::RxBadPackets), 1);
        assert_eq!(eth1.base().counters().packets(CounterId::RxPackets), 0);
        ctx.stop();
    }

    #[tokio::test]
    async fn test_trace_follows_packet() {
        let (ctx, _links) = ctx();
        let builders = PortBuilders::with_defaults();
        let eth1 = builders
            .create(&ctx, kernel("eth1").with_attribute("trace", "true"))
            .unwrap();
        builders.create(&ctx, kernel("eth2")).unwrap();
        eth1.update(&ctx, PortUpdate::InputActions(vec![Action::transmit("eth2")]))
            .unwrap();
        let lines = input(&ctx, &eth1, Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap());
        assert_eq!(lines.first().map(String::as_str), Some("input eth1"));
        assert!(lines.iter().any(|l| l == "write eth2"));
        ctx.stop();
    }

    #[tokio::test]
    async fn test_unknown_action_target_rejected() {
        let (ctx, _links) = ctx();
        let builders = PortBuilders::with_defaults();
        let err = builders
            .create(&ctx, kernel("eth1").with_input(vec![Action::lookup("nope")]))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(ctx.get("eth1").is_err());
        ctx.stop();
    }
}
