//! The forwarding service.
//!
//! [`Engine`] is the in-process control surface of the dataplane: it owns
//! the named contexts and exposes every forwarding operation (contexts,
//! tables, sets, ports, notifications, packet injection, the packet sink and
//! debugging info) as plain method calls.

use crate::action::{self, Action};
use crate::context::{Context, FwdObject};
use crate::counter::{CounterId, CounterValue, TABLE_COUNTERS};
use crate::error::{FwdError, Result};
use crate::field::FieldId;
use crate::notify::Subscription;
use crate::object::{Nid, Object, ObjectKind};
use crate::packet::{HeaderId, Packet, UpdateOp};
use crate::port::{self, LinkProvider, PacketSink, PortBuilders, PortDesc, PortUpdate};
use crate::set::FwdSet;
use crate::table::{EntryDesc, Table, TableDesc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vdp_types::{AdminState, OperState};

/// Where an injected packet enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Through the port's input path, as if received.
    Ingress,
    /// Through the port's output path, as if forwarded to it.
    Egress,
}

/// Admin and oper state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub admin: AdminState,
    pub oper: OperState,
}

/// Debugging queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoRequest {
    /// Every object in the context.
    List,
    /// Details of one object.
    Get { id: String },
    /// Runs a frame through one table and reports the match.
    Lookup { table: String, frame: Vec<u8> },
    /// Runs a frame through a port's input path.
    PortInput { port: String, frame: Vec<u8> },
    /// Runs a frame through a port's output path.
    PortOutput { port: String, frame: Vec<u8> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoReply {
    pub lines: Vec<String>,
}

/// The forwarding engine.
pub struct Engine {
    contexts: DashMap<String, Arc<Context>>,
    links: Arc<dyn LinkProvider>,
    builders: PortBuilders,
}

impl Engine {
    pub fn new(links: Arc<dyn LinkProvider>) -> Self {
        Self::with_builders(links, PortBuilders::with_defaults())
    }

    pub fn with_builders(links: Arc<dyn LinkProvider>, builders: PortBuilders) -> Self {
        Self {
            contexts: DashMap::new(),
            links,
            builders,
        }
    }

    pub fn builders(&self) -> &PortBuilders {
        &self.builders
    }

    pub fn context_create(&self, name: &str) -> Result<Arc<Context>> {
        if name.is_empty() {
            return Err(FwdError::invalid_argument("empty context name"));
        }
        match self.contexts.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(FwdError::invalid_argument(format!("context {} already exists", name)))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let ctx = Context::new(name, self.links.clone());
                v.insert(ctx.clone());
                info!(context = %name, "context created");
                Ok(ctx)
            }
        }
    }

    /// Stops a context and forgets it.
    pub fn context_delete(&self, name: &str) -> Result<()> {
        let (_, ctx) = self
            .contexts
            .remove(name)
            .ok_or_else(|| FwdError::not_found(format!("context {}", name)))?;
        ctx.stop();
        info!(context = %name, "context deleted");
        Ok(())
    }

    pub fn context(&self, name: &str) -> Result<Arc<Context>> {
        self.contexts
            .get(name)
            .map(|c| c.value().clone())
            .ok_or_else(|| FwdError::not_found(format!("context {}", name)))
    }

    pub fn context_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn object_nid(&self, ctx: &str, id: &str) -> Result<Nid> {
        self.context(ctx)?.nid(id)
    }

    pub fn object_delete(&self, ctx: &str, id: &str) -> Result<()> {
        self.context(ctx)?.delete(id)
    }

    pub fn object_counters(&self, ctx: &str, id: &str) -> Result<Vec<(CounterId, CounterValue)>> {
        Ok(self.context(ctx)?.get(id)?.base().counters().snapshot())
    }

    pub fn table_create(&self, ctx: &str, desc: TableDesc) -> Result<Nid> {
        let ctx = self.context(ctx)?;
        action::validate(&ctx, &desc.default_actions)?;
        let base = ctx.new_base(desc.id.as_deref(), ObjectKind::Table, TABLE_COUNTERS)?;
        let table = Arc::new(Table::new(base, &desc)?);
        let nid = table.nid();
        ctx.insert(FwdObject::Table(table))?;
        Ok(nid)
    }

    /// Adds entries in order. Stops at the first failure; earlier entries
    /// stay installed.
    pub fn table_entry_add(&self, ctx: &str, table: &str, entries: Vec<(EntryDesc, Vec<Action>)>) -> Result<()> {
        let ctx = self.context(ctx)?;
        let table = ctx.table(table)?;
        for (entry, actions) in entries {
            action::validate(&ctx, &actions)?;
            table.add_entry(&ctx, entry, actions)?;
        }
        Ok(())
    }

    pub fn table_entry_remove(&self, ctx: &str, table: &str, entries: &[EntryDesc]) -> Result<()> {
        let ctx = self.context(ctx)?;
        let table = ctx.table(table)?;
        for entry in entries {
            table.remove_entry(entry)?;
        }
        Ok(())
    }

    pub fn table_default_set(&self, ctx: &str, table: &str, actions: Vec<Action>) -> Result<()> {
        let ctx = self.context(ctx)?;
        action::validate(&ctx, &actions)?;
        ctx.table(table)?.set_default(actions);
        Ok(())
    }

    pub fn set_create(&self, ctx: &str, id: Option<&str>, members: Vec<Vec<u8>>) -> Result<Nid> {
        let ctx = self.context(ctx)?;
        let base = ctx.new_base(id, ObjectKind::Set, &[])?;
        let set = Arc::new(FwdSet::new(base, members));
        let nid = set.base().nid();
        ctx.insert(FwdObject::Set(set))?;
        Ok(nid)
    }

    pub fn set_update(&self, ctx: &str, id: &str, members: Vec<Vec<u8>>) -> Result<()> {
        self.context(ctx)?.set(id)?.update(members);
        Ok(())
    }

    pub fn port_create(&self, ctx: &str, desc: PortDesc) -> Result<Nid> {
        let ctx = self.context(ctx)?;
        Ok(self.builders.create(&ctx, desc)?.nid())
    }

    pub fn port_update(&self, ctx: &str, port: &str, update: PortUpdate) -> Result<()> {
        let ctx = self.context(ctx)?;
        ctx.port(port)?.update(&ctx, update)
    }

    /// Reads the port state, setting the admin state first if given.
    pub fn port_state(&self, ctx: &str, port: &str, admin: Option<AdminState>) -> Result<PortStatus> {
        let ctx = self.context(ctx)?;
        let port = ctx.port(port)?;
        if let Some(admin) = admin {
            port.set_admin(admin);
        }
        Ok(PortStatus {
            admin: port.admin_state(),
            oper: port.oper_state(),
        })
    }

    pub fn notify_subscribe(&self, ctx: &str, cancel: CancellationToken) -> Result<Subscription> {
        Ok(self.context(ctx)?.notify().subscribe(cancel))
    }

    /// Injects a frame on a port with the given metadata. Returns the packet
    /// trace when the port or context enables tracing.
    pub fn packet_inject(
        &self,
        ctx: &str,
        port: &str,
        direction: Direction,
        frame: &[u8],
        metadata: &[(FieldId, Vec<u8>)],
    ) -> Result<Vec<String>> {
        let ctx = self.context(ctx)?;
        let port = ctx.port(port)?;
        let mut pkt = Packet::parse(HeaderId::Ethernet, frame)?;
        for (field, value) in metadata {
            pkt.update(field, UpdateOp::Set, value)?;
        }
        debug!(context = %ctx.name(), port = %port.id(), ?direction, len = frame.len(), "packet injected");
        Ok(match direction {
            Direction::Ingress => port::input(&ctx, &port, pkt),
            Direction::Egress => port::output(&ctx, &port, pkt),
        })
    }

    /// Registers the receiver of everything punted to the context's CPU and
    /// generic-netlink ports.
    pub fn packet_sink(&self, ctx: &str, sink: Arc<dyn PacketSink>) -> Result<()> {
        self.context(ctx)?.set_sink(sink);
        Ok(())
    }

    pub fn info(&self, ctx: &str, request: InfoRequest) -> Result<InfoReply> {
        let ctx = self.context(ctx)?;
        let lines = match request {
            InfoRequest::List => ctx
                .objects()
                .iter()
                .map(|o| format!("{} {} nid {} refs {}", o.kind(), o.base().id(), o.base().nid(), o.base().ref_count()))
                .collect(),
            InfoRequest::Get { id } => describe(&ctx.get(&id)?),
            InfoRequest::Lookup { table, frame } => {
                let table = ctx.table(&table)?;
                let mut pkt = Packet::parse(HeaderId::Ethernet, &frame)?;
                pkt.enable_trace();
                let (actions, _) = table.process(&mut pkt);
                let mut lines = pkt.take_log();
                lines.push(format!("actions: {}", join(&actions)));
                lines
            }
            InfoRequest::PortInput { port, frame } => {
                let port = ctx.port(&port)?;
                let mut pkt = Packet::parse(HeaderId::Ethernet, &frame)?;
                pkt.enable_trace();
                port::input(&ctx, &port, pkt)
            }
            InfoRequest::PortOutput { port, frame } => {
                let port = ctx.port(&port)?;
                let mut pkt = Packet::parse(HeaderId::Ethernet, &frame)?;
                pkt.enable_trace();
                port::output(&ctx, &port, pkt)
            }
        };
        Ok(InfoReply { lines })
    }

    /// Stops every context. Stopping twice does nothing.
    pub fn stop(&self) {
        for entry in self.contexts.iter() {
            entry.value().stop();
        }
    }

    /// Waits for the workers of every context to exit.
    pub async fn wait(&self) {
        let contexts: Vec<Arc<Context>> = self.contexts.iter().map(|e| e.value().clone()).collect();
        for ctx in contexts {
            ctx.wait().await;
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("contexts", &self.context_names())
            .field("builders", &self.builders)
            .finish()
    }
}

fn join(actions: &[Action]) -> String {
    actions.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

fn describe(obj: &FwdObject) -> Vec<String> {
    let mut lines = Vec::new();
    match obj {
        FwdObject::Port(p) => {
            lines.push(p.describe());
            lines.push(format!("admin {} oper {}", p.admin_state(), p.oper_state()));
            lines.push(format!("input: {}", join(&p.input_actions())));
            lines.push(format!("output: {}", join(&p.output_actions())));
        }
        FwdObject::Table(t) => {
            lines.push(format!("{} table {} with {} entries", t.kind(), t.id(), t.len()));
            for (entry, actions) in t.entries() {
                let keys: Vec<String> = entry
                    .keys
                    .iter()
                    .map(|k| match &k.mask {
                        Some(m) => format!("{}={}/{}", k.field, action::hex(&k.value), action::hex(m)),
                        None => format!("{}={}", k.field, action::hex(&k.value)),
                    })
                    .chain(entry.qualifiers.iter().map(|q| format!("{} in {}", q.field, q.set)))
                    .collect();
                lines.push(format!(
                    "bank {} prio {} [{}] -> {}",
                    entry.bank,
                    entry.priority,
                    keys.join(" "),
                    join(&actions)
                ));
            }
            lines.push(format!("default -> {}", join(&t.default_actions())));
        }
        FwdObject::Set(s) => {
            lines.push(format!("set {} with {} members", s.base().id(), s.len()));
            lines.extend(s.members().iter().map(|m| action::hex(m)));
        }
    }
    for (id, value) in obj.base().counters().snapshot() {
        lines.push(format!("{}: {} packets {} octets", id, value.packets, value.octets));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldNum;
    use crate::packet::tests::udp4_frame;
    use crate::port::{LoopbackLinks, PortConfig};
    use crate::table::EntryKey;
    use pretty_assertions::assert_eq;

    fn engine() -> (Engine, LoopbackLinks) {
        let links = LoopbackLinks::new();
        (Engine::new(Arc::new(links.clone())), links)
    }

    #[test]
    fn test_context_lifecycle() {
        let (engine, _) = engine();
        engine.context_create("a").unwrap();
        assert!(engine.context_create("a").is_err());
        assert_eq!(engine.context_names(), vec!["a".to_string()]);
        engine.context_delete("a").unwrap();
        assert!(engine.context("a").unwrap_err().is_not_found());
        assert!(engine.context_delete("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_table_and_lookup_info() {
        let (engine, _) = engine();
        engine.context_create("c").unwrap();
        let nid = engine
            .table_create("c", TableDesc::exact("by-proto", vec![FieldNum::IpProto.into()]))
            .unwrap();
        assert_eq!(engine.object_nid("c", "by-proto").unwrap(), nid);
        engine
            .table_entry_add(
                "c",
                "by-proto",
                vec![(
                    EntryDesc::new(vec![EntryKey::new(FieldNum::IpProto, vec![17])]),
                    vec![Action::set(FieldNum::PacketVrf, vec![7])],
                )],
            )
            .unwrap();

        let reply = engine
            .info(
                "c",
                InfoRequest::Lookup {
                    table: "by-proto".into(),
                    frame: udp4_frame(),
                },
            )
            .unwrap();
        assert_eq!(
            reply.lines,
            vec![
                "by-proto: hit".to_string(),
                "actions: Update(PACKET_VRF, Set, 07)".to_string()
            ]
        );

        let counters = engine.object_counters("c", "by-proto").unwrap();
        assert!(counters.contains(&(CounterId::TableHit, CounterValue { packets: 1, octets: udp4_frame().len() as u64 })));
    }

    #[test]
    fn test_entry_actions_validated() {
        let (engine, _) = engine();
        engine.context_create("c").unwrap();
        engine
            .table_create("c", TableDesc::exact("t", vec![FieldNum::IpProto.into()]))
            .unwrap();
        let err = engine
            .table_entry_add(
                "c",
                "t",
                vec![(
                    EntryDesc::new(vec![EntryKey::new(FieldNum::IpProto, vec![1])]),
                    vec![Action::transmit("missing")],
                )],
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.context("c").unwrap().table("t").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inject_and_port_state() {
        let (engine, links) = engine();
        engine.context_create("c").unwrap();
        engine
            .port_create("c", PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() }))
            .unwrap();
        engine
            .packet_inject("c", "eth1", Direction::Egress, &udp4_frame(), &[])
            .unwrap();
        assert_eq!(links.peer("eth1").try_recv().unwrap(), udp4_frame());

        let status = engine.port_state("c", "eth1", Some(AdminState::Down)).unwrap();
        assert_eq!(
            status,
            PortStatus {
                admin: AdminState::Down,
                oper: OperState::Down
            }
        );
        engine.stop();
        engine.stop();
        engine.wait().await;
    }

    #[tokio::test]
    async fn test_set_in_use_cannot_be_deleted() {
        let (engine, _) = engine();
        engine.context_create("c").unwrap();
        engine.set_create("c", Some("s"), vec![vec![1]]).unwrap();
        engine.table_create("c", TableDesc::flow("acl", 1)).unwrap();
        let entry = EntryDesc::flow(0, 0, vec![]).with_qualifier(FieldNum::IpProto, "s");
        engine
            .table_entry_add("c", "acl", vec![(entry.clone(), vec![Action::Drop])])
            .unwrap();
        assert!(matches!(
            engine.object_delete("c", "s"),
            Err(FwdError::FailedPrecondition(_))
        ));
        engine.table_entry_remove("c", "acl", &[entry]).unwrap();
        engine.object_delete("c", "s").unwrap();
        assert!(engine.object_nid("c", "s").unwrap_err().is_not_found());
    }
}
