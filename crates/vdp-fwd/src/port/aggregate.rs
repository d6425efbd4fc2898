//! Aggregate ports: hash-select or flood over a set of member ports.
//!
//! Each member appears `instances` times in the selection vector, so a
//! member's share of hashed traffic scales with its instance count. Flooded
//! copies go through a per-member queue drained by that member's worker;
//! hashed packets are written synchronously.

use super::queue::{queue, PushError, QueueTx};
use super::{output, spawn_worker, Port, PortBuilder, PortConfig, PortDriver, PortUpdate};
use crate::action::{self, Action, Verdict};
use crate::context::Context;
use crate::counter::CounterId;
use crate::error::{FwdError, Result};
use crate::field::{FieldId, FieldNum};
use crate::hash::{hash_key, HashAlgorithm};
use crate::object::{Nid, Object};
use crate::packet::Packet;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One member of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMember {
    pub port: String,
    #[serde(default = "one")]
    pub instances: usize,
    /// Run before the packet is output on the member.
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn one() -> usize {
    1
}

impl AggregateMember {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            instances: 1,
            actions: Vec::new(),
        }
    }

    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }
}

/// Aggregate port settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub algorithm: HashAlgorithm,
    pub hash_fields: Vec<FieldId>,
    /// Per-member flood queue length; zero means unbounded.
    pub queue_len: usize,
    pub members: Vec<AggregateMember>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Crc32,
            hash_fields: Vec::new(),
            queue_len: 256,
            members: Vec::new(),
        }
    }
}

struct Member {
    desc: AggregateMember,
    nid: Nid,
    actions: Arc<[Action]>,
    queue: QueueTx<Packet>,
    cancel: CancellationToken,
}

struct AggState {
    algorithm: HashAlgorithm,
    hash_fields: Vec<FieldId>,
    members: BTreeMap<String, Member>,
    /// Member ids, each repeated by its instance count.
    selection: Vec<String>,
}

impl AggState {
    fn rebuild(&mut self) {
        self.selection = self
            .members
            .values()
            .flat_map(|m| std::iter::repeat(m.desc.port.clone()).take(m.desc.instances))
            .collect();
    }
}

/// The aggregate half of an aggregate port.
pub struct AggregatePort {
    id: String,
    queue_len: usize,
    state: RwLock<AggState>,
    initial: Mutex<Vec<AggregateMember>>,
    cancel: OnceLock<CancellationToken>,
}

fn is_ready(ctx: &Context, port: &str) -> bool {
    ctx.port(port).is_ok_and(|p| p.oper_state().is_up())
}

/// Runs a member's actions and outputs the packet on the member port.
fn member_write(ctx: &Arc<Context>, port: &str, actions: &[Action], mut pkt: Packet) {
    let Ok(port) = ctx.port(port) else {
        debug!(port, "aggregate member is gone, dropping");
        return;
    };
    match action::execute(ctx, actions, &mut pkt) {
        Verdict::Drop | Verdict::Consume => {}
        Verdict::Continue | Verdict::Output => {
            output(ctx, &port, pkt);
        }
    }
}

impl AggregatePort {
    fn new(id: &str, config: &AggregateConfig) -> Self {
        Self {
            id: id.to_string(),
            queue_len: config.queue_len,
            state: RwLock::new(AggState {
                algorithm: config.algorithm,
                hash_fields: config.hash_fields.clone(),
                members: BTreeMap::new(),
                selection: Vec::new(),
            }),
            initial: Mutex::new(config.members.clone()),
            cancel: OnceLock::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.state.read().algorithm
    }

    pub fn hash_fields(&self) -> Vec<FieldId> {
        self.state.read().hash_fields.clone()
    }

    /// Members in id order.
    pub fn members(&self) -> Vec<AggregateMember> {
        self.state.read().members.values().map(|m| m.desc.clone()).collect()
    }

    pub fn has_member(&self, port: &str) -> bool {
        self.state.read().members.contains_key(port)
    }

    pub fn selection_len(&self) -> usize {
        self.state.read().selection.len()
    }

    /// Members whose port is operationally up.
    pub fn ready_members(&self, ctx: &Context) -> Vec<String> {
        self.state
            .read()
            .members
            .keys()
            .filter(|id| is_ready(ctx, id))
            .cloned()
            .collect()
    }

    fn check_member(&self, ctx: &Context, desc: &AggregateMember) -> Result<Nid> {
        if desc.port == self.id {
            return Err(FwdError::invalid_argument(format!("{} cannot be its own member", self.id)));
        }
        if desc.instances == 0 {
            return Err(FwdError::invalid_argument(format!(
                "member {} needs at least one instance",
                desc.port
            )));
        }
        action::validate(ctx, &desc.actions)?;
        Ok(ctx.port(&desc.port)?.nid())
    }

    fn spawn_member(&self, ctx: &Arc<Context>, desc: AggregateMember, nid: Nid) -> Result<Member> {
        let parent = self
            .cancel
            .get()
            .ok_or_else(|| FwdError::failed_precondition(format!("aggregate {} not started", self.id)))?;
        let cancel = parent.child_token();
        let (tx, mut rx) = queue::<Packet>(self.queue_len);
        let actions: Arc<[Action]> = desc.actions.clone().into();
        let weak_ctx = Arc::downgrade(ctx);
        let worker_cancel = cancel.clone();
        let worker_actions = actions.clone();
        let port = desc.port.clone();
        spawn_worker(ctx, async move {
            loop {
                let pkt = tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    p = rx.recv() => match p {
                        Some(p) => p,
                        None => break,
                    },
                };
                let Some(ctx) = weak_ctx.upgrade() else {
                    break;
                };
                member_write(&ctx, &port, &worker_actions, pkt);
            }
            debug!(member = %port, "aggregate member worker exited");
        })?;
        Ok(Member {
            desc,
            nid,
            actions,
            queue: tx,
            cancel,
        })
    }

    fn add_member(&self, ctx: &Arc<Context>, desc: AggregateMember) -> Result<()> {
        let nid = self.check_member(ctx, &desc)?;
        let member = self.spawn_member(ctx, desc, nid)?;
        let mut state = self.state.write();
        if let Some(old) = state.members.insert(member.desc.port.clone(), member) {
            old.cancel.cancel();
        }
        state.rebuild();
        Ok(())
    }

    fn remove_member(&self, port: &str) -> Result<()> {
        let mut state = self.state.write();
        let old = state
            .members
            .remove(port)
            .ok_or_else(|| FwdError::not_found(format!("member {} of aggregate {}", port, self.id)))?;
        old.cancel.cancel();
        state.rebuild();
        Ok(())
    }

    fn replace_members(&self, ctx: &Arc<Context>, members: Vec<AggregateMember>) -> Result<()> {
        let mut fresh = BTreeMap::new();
        for desc in &members {
            let nid = self.check_member(ctx, desc)?;
            fresh.insert(desc.port.clone(), nid);
        }
        let mut built = BTreeMap::new();
        for desc in members {
            let nid = fresh[&desc.port];
            let member = self.spawn_member(ctx, desc, nid)?;
            built.insert(member.desc.port.clone(), member);
        }
        let mut state = self.state.write();
        for old in std::mem::replace(&mut state.members, built).into_values() {
            old.cancel.cancel();
        }
        state.rebuild();
        Ok(())
    }

    /// Writes `pkt` to one member chosen by hashing the configured fields,
    /// or floods it when the algorithm is flood.
    pub fn select(&self, ctx: &Arc<Context>, port: &Port, pkt: Packet) {
        let (member, actions) = {
            let state = self.state.read();
            if state.algorithm.is_flood() {
                drop(state);
                self.flood(ctx, port, &pkt);
                return;
            }
            if state.selection.is_empty() {
                drop(state);
                port.base().counters().increment(CounterId::TxDrop, pkt.length());
                debug!(aggregate = %self.id, "no members, dropping");
                return;
            }
            let key = hash_key(&pkt, &state.hash_fields);
            let idx = state.algorithm.index(&key, state.selection.len());
            let id = state.selection[idx].clone();
            let actions = state.members.get(&id).map(|m| m.actions.clone());
            (id, actions.unwrap_or_else(|| Vec::<Action>::new().into()))
        };
        member_write(ctx, &member, &actions, pkt);
    }

    /// Queues a copy of `pkt` to every ready member except the one the
    /// packet came in on.
    pub fn flood(&self, ctx: &Arc<Context>, port: &Port, pkt: &Packet) {
        let ingress = pkt.metadata_u64(FieldNum::PacketPortInput);
        let state = self.state.read();
        let mut sent = 0;
        for member in state.members.values() {
            if member.nid == ingress || !is_ready(ctx, &member.desc.port) {
                continue;
            }
            match member.queue.push(pkt.clone()) {
                Ok(()) => sent += 1,
                Err(PushError::Full) => {
                    if let Ok(p) = ctx.port(&member.desc.port) {
                        p.base().counters().increment(CounterId::TxDrop, pkt.length());
                    }
                    debug!(aggregate = %self.id, member = %member.desc.port, "flood queue full");
                }
                Err(PushError::Closed) => {
                    debug!(aggregate = %self.id, member = %member.desc.port, "flood queue closed");
                }
            }
        }
        if sent == 0 {
            port.base().counters().increment(CounterId::TxDrop, pkt.length());
        }
    }
}

impl PortDriver for AggregatePort {
    fn write(&self, port: &Port, pkt: Packet) -> Result<()> {
        let ctx = port
            .context()
            .ok_or_else(|| FwdError::failed_precondition("context is gone"))?;
        self.select(&ctx, port, pkt);
        Ok(())
    }

    fn link_up(&self, ctx: &Context) -> bool {
        !self.ready_members(ctx).is_empty()
    }

    fn start(&self, port: &Arc<Port>, ctx: &Arc<Context>) -> Result<()> {
        self.cancel
            .set(port.cancel_token().clone())
            .map_err(|_| FwdError::failed_precondition(format!("aggregate {} already started", self.id)))?;
        let initial = std::mem::take(&mut *self.initial.lock());
        self.replace_members(ctx, initial)
    }

    fn update(&self, port: &Port, ctx: &Arc<Context>, update: &PortUpdate) -> Result<()> {
        match update {
            PortUpdate::AggregateAlgorithm(a) => self.state.write().algorithm = *a,
            PortUpdate::AggregateHashFields(fields) => self.state.write().hash_fields = fields.clone(),
            PortUpdate::AggregateAdd(member) => self.add_member(ctx, member.clone())?,
            PortUpdate::AggregateRemove(member) => self.remove_member(member)?,
            PortUpdate::AggregateReplace(members) => self.replace_members(ctx, members.clone())?,
            other => {
                return Err(FwdError::invalid_argument(format!(
                    "{} update not supported by aggregate port {}",
                    other,
                    port.id()
                )))
            }
        }
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.write();
        for member in std::mem::take(&mut state.members).into_values() {
            member.cancel.cancel();
        }
        state.selection.clear();
    }

    fn as_aggregate(&self) -> Option<&AggregatePort> {
        Some(self)
    }

    fn describe(&self) -> String {
        let state = self.state.read();
        let members: Vec<String> = state
            .members
            .values()
            .map(|m| format!("{}x{}", m.desc.port, m.desc.instances))
            .collect();
        format!("{} over [{}]", state.algorithm, members.join(", "))
    }
}

pub(super) struct AggregateBuilder;

impl PortBuilder for AggregateBuilder {
    fn build(&self, _ctx: &Arc<Context>, id: &str, config: &PortConfig) -> Result<Box<dyn PortDriver>> {
        let PortConfig::Aggregate(cfg) = config else {
            return Err(FwdError::invalid_argument("aggregate builder given a non-aggregate config"));
        };
        Ok(Box::new(AggregatePort::new(id, cfg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tests::udp4_frame;
    use crate::packet::{HeaderId, UpdateOp};
    use crate::port::{LoopbackLinks, PortBuilders, PortDesc};
    use std::time::Duration;

    struct Fixture {
        ctx: Arc<Context>,
        links: LoopbackLinks,
        builders: PortBuilders,
    }

    fn fixture(members: &[&str]) -> Fixture {
        let links = LoopbackLinks::new();
        let ctx = Context::new("agg", Arc::new(links.clone()));
        let builders = PortBuilders::with_defaults();
        for m in members {
            builders
                .create(&ctx, PortDesc::new(*m, PortConfig::Kernel { device: m.to_string() }))
                .unwrap();
        }
        Fixture { ctx, links, builders }
    }

    fn packet() -> Packet {
        Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap()
    }

    #[tokio::test]
    async fn test_instances_weight_selection() {
        let f = fixture(&["p1", "p2"]);
        let cfg = AggregateConfig {
            members: vec![AggregateMember::new("p1").with_instances(3), AggregateMember::new("p2")],
            ..Default::default()
        };
        let ag = f
            .builders
            .create(&f.ctx, PortDesc::new("ag", PortConfig::Aggregate(cfg)))
            .unwrap();
        let agg = ag.aggregate().unwrap();
        assert_eq!(agg.selection_len(), 4);
        assert!(ag.oper_state().is_up());

        ag.update(&f.ctx, PortUpdate::AggregateRemove("p1".into())).unwrap();
        assert_eq!(agg.selection_len(), 1);
        assert!(ag
            .update(&f.ctx, PortUpdate::AggregateRemove("p1".into()))
            .unwrap_err()
            .is_not_found());
        f.ctx.stop();
    }

    #[tokio::test]
    async fn test_hash_spreads_over_members() {
        let f = fixture(&["p1", "p2", "p3", "p4"]);
        let cfg = AggregateConfig {
            algorithm: HashAlgorithm::Crc16,
            hash_fields: vec![FieldNum::IpProto.into()],
            members: ["p1", "p2", "p3", "p4"].into_iter().map(AggregateMember::new).collect(),
            ..Default::default()
        };
        let ag = f
            .builders
            .create(&f.ctx, PortDesc::new("ag", PortConfig::Aggregate(cfg)))
            .unwrap();
        for proto in 0..=255u8 {
            let mut pkt = packet();
            pkt.update(&FieldNum::IpProto.into(), UpdateOp::Set, &[proto]).unwrap();
            ag.aggregate().unwrap().select(&f.ctx, &ag, pkt);
        }
        let counts: Vec<usize> = ["p1", "p2", "p3", "p4"]
            .iter()
            .map(|p| f.links.peer(p).drain().len())
            .collect();
        assert_eq!(counts.iter().sum::<usize>(), 256);
        assert!(counts.iter().filter(|c| **c > 0).count() >= 2);
        f.ctx.stop();
    }

    #[tokio::test]
    async fn test_flood_skips_ingress() {
        let f = fixture(&["p1", "p2", "p3"]);
        let cfg = AggregateConfig {
            algorithm: HashAlgorithm::Flood,
            members: ["p1", "p2", "p3"].into_iter().map(AggregateMember::new).collect(),
            ..Default::default()
        };
        let ag = f
            .builders
            .create(&f.ctx, PortDesc::new("ag", PortConfig::Aggregate(cfg)))
            .unwrap();
        let mut pkt = packet();
        pkt.set_metadata_u64(FieldNum::PacketPortInput, f.ctx.nid("p1").unwrap());
        ag.aggregate().unwrap().select(&f.ctx, &ag, pkt);

        for p in ["p2", "p3"] {
            let frame = tokio::time::timeout(Duration::from_secs(5), f.links.peer(p).recv())
                .await
                .unwrap();
            assert_eq!(frame, Some(udp4_frame()));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.links.peer("p1").try_recv().is_none());
        f.ctx.stop();
    }

    #[tokio::test]
    async fn test_member_validation() {
        let f = fixture(&["p1"]);
        let ag = f
            .builders
            .create(&f.ctx, PortDesc::new("ag", PortConfig::Aggregate(AggregateConfig::default())))
            .unwrap();
        assert!(!ag.oper_state().is_up());
        assert!(ag
            .update(&f.ctx, PortUpdate::AggregateAdd(AggregateMember::new("ag")))
            .is_err());
        assert!(ag
            .update(&f.ctx, PortUpdate::AggregateAdd(AggregateMember::new("p9")))
            .unwrap_err()
            .is_not_found());
        ag.update(&f.ctx, PortUpdate::AggregateAdd(AggregateMember::new("p1")))
            .unwrap();
        assert!(ag.oper_state().is_up());
        assert_eq!(ag.aggregate().unwrap().members(), vec![AggregateMember::new("p1")]);
        f.ctx.stop();
    }
}
