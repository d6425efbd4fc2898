//! The switch: one forwarding context plus the SAI object state compiled
//! into it.
//!
//! [`Switch::create`] builds the pipeline tables and the CPU port, then the
//! default objects every SAI switch starts with. The per-object APIs
//! ([`PortApi`](crate::api::PortApi), [`RouteApi`](crate::api::RouteApi), ...)
//! borrow the switch and serialize on its state lock, so a create or remove
//! either fully programs the tables or leaves them untouched.

use crate::api::acl::{AclEntryRecord, AclGroupMemberRecord, AclGroupRecord, AclTableRecord};
use crate::api::hostif::{HostifRecord, TrapRecord};
use crate::api::lag::{LagMemberRecord, LagRecord};
use crate::api::neighbor::{NeighborEntry, NeighborRecord};
use crate::api::next_hop::{GroupMemberRecord, GroupRecord, NextHopRecord};
use crate::api::port::{PortOperStatus, PortRecord};
use crate::api::route::{RouteEntry, RouteRecord};
use crate::api::router::{MyMacRecord, RifRecord};
use crate::api::{AclApi, HostifApi, LagApi, NeighborApi, NextHopApi, PortApi, RouteApi, RouterApi};
use crate::attr::{AttrValue, AttributeRequest, AttributeStore, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::{self, CPU_PORT};
use crate::sai_attributes;
use crate::types::*;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vdp_fwd::port::CpuPortConfig;
use vdp_fwd::{Action, Engine, EntryDesc, FieldNum, Nid, PortConfig, PortDesc, Subscription};
use vdp_types::MacAddress;

/// ACL limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Banks of each table group's flow table; one per group member.
    pub banks: usize,
    pub min_priority: u32,
    pub max_priority: u32,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            banks: 8,
            min_priority: 0,
            max_priority: 16383,
        }
    }
}

/// Switch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Name of the forwarding context the switch lives in.
    pub context: String,
    /// Default source MAC of router interfaces.
    pub mac: MacAddress,
    pub cpu: CpuPortConfig,
    /// Hardware lane to host device; unmapped lanes use `eth{lane}`.
    pub lanes: BTreeMap<u32, String>,
    /// Per-member flood queue length of LAGs; zero means unbounded.
    pub lag_queue_len: usize,
    pub acl: AclConfig,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            context: "switch".to_string(),
            mac: MacAddress::new([0x02, 0, 0, 0, 0, 0x01]),
            cpu: CpuPortConfig {
                export: vec![FieldNum::TrapId.into(), FieldNum::InputIface.into()],
                ..CpuPortConfig::default()
            },
            lanes: BTreeMap::new(),
            lag_queue_len: 256,
            acl: AclConfig::default(),
        }
    }
}

impl SwitchConfig {
    /// Host device backing the port whose first lane is `lane`.
    pub fn device_for(&self, lane: u32) -> String {
        self.lanes
            .get(&lane)
            .cloned()
            .unwrap_or_else(|| format!("eth{}", lane))
    }
}

/// Hash algorithms a switch reports for ECMP and LAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SaiHashAlgorithm {
    #[default]
    Crc,
    Xor,
    Random,
    CrcCcitt,
}

impl From<SaiHashAlgorithm> for AttrValue {
    fn from(v: SaiHashAlgorithm) -> Self {
        AttrValue::I32(match v {
            SaiHashAlgorithm::Crc => 0,
            SaiHashAlgorithm::Xor => 1,
            SaiHashAlgorithm::Random => 2,
            SaiHashAlgorithm::CrcCcitt => 5,
        })
    }
}

/// Writable switch attributes.
#[derive(Debug, Clone, Default)]
pub struct SwitchRequest {
    pub src_mac_address: Option<MacAddress>,
    pub ecmp_default_hash_algorithm: Option<SaiHashAlgorithm>,
    pub ecmp_default_symmetric_hash: Option<bool>,
    pub lag_default_hash_algorithm: Option<SaiHashAlgorithm>,
    pub lag_default_symmetric_hash: Option<bool>,
    pub hardware_info: Option<String>,
}

sai_attributes! {
    /// Switch attributes.
    pub enum SwitchAttr: Switch for SwitchRequest {
        PortNumber = 0, "SAI_SWITCH_ATTR_PORT_NUMBER";
        PortList = 2, "SAI_SWITCH_ATTR_PORT_LIST";
        CpuPort = 4, "SAI_SWITCH_ATTR_CPU_PORT";
        DefaultVirtualRouterId = 5, "SAI_SWITCH_ATTR_DEFAULT_VIRTUAL_ROUTER_ID";
        Default1QBridgeId = 6, "SAI_SWITCH_ATTR_DEFAULT_1Q_BRIDGE_ID";
        DefaultVlanId = 7, "SAI_SWITCH_ATTR_DEFAULT_VLAN_ID";
        DefaultTrapGroup = 8, "SAI_SWITCH_ATTR_DEFAULT_TRAP_GROUP";
        DefaultStpInstId = 9, "SAI_SWITCH_ATTR_DEFAULT_STP_INST_ID";
        EcmpHash = 10, "SAI_SWITCH_ATTR_ECMP_HASH";
        LagHash = 11, "SAI_SWITCH_ATTR_LAG_HASH";
        SrcMacAddress = 12, "SAI_SWITCH_ATTR_SRC_MAC_ADDRESS" => src_mac_address;
        AclEntryMinimumPriority = 13, "SAI_SWITCH_ATTR_ACL_ENTRY_MINIMUM_PRIORITY";
        AclEntryMaximumPriority = 14, "SAI_SWITCH_ATTR_ACL_ENTRY_MAXIMUM_PRIORITY";
        EcmpDefaultHashAlgorithm = 15, "SAI_SWITCH_ATTR_ECMP_DEFAULT_HASH_ALGORITHM"
            => ecmp_default_hash_algorithm, default SaiHashAlgorithm::Crc;
        EcmpDefaultSymmetricHash = 16, "SAI_SWITCH_ATTR_ECMP_DEFAULT_HASH_SYMMETRIC"
            => ecmp_default_symmetric_hash, default false;
        LagDefaultHashAlgorithm = 17, "SAI_SWITCH_ATTR_LAG_DEFAULT_HASH_ALGORITHM"
            => lag_default_hash_algorithm, default SaiHashAlgorithm::Crc;
        LagDefaultSymmetricHash = 18, "SAI_SWITCH_ATTR_LAG_DEFAULT_HASH_SYMMETRIC"
            => lag_default_symmetric_hash, default false;
        SwitchHardwareInfo = 19, "SAI_SWITCH_ATTR_SWITCH_HARDWARE_INFO" => hardware_info, default "vdp";
        NumberOfActivePorts = 20, "SAI_SWITCH_ATTR_NUMBER_OF_ACTIVE_PORTS";
        MaxNumberOfSupportedPorts = 21, "SAI_SWITCH_ATTR_MAX_NUMBER_OF_SUPPORTED_PORTS", default 512u32;
        AvailableIpv4RouteEntry = 22, "SAI_SWITCH_ATTR_AVAILABLE_IPV4_ROUTE_ENTRY", default 1_000_000u32;
        AvailableIpv6RouteEntry = 23, "SAI_SWITCH_ATTR_AVAILABLE_IPV6_ROUTE_ENTRY", default 1_000_000u32;
        AvailableIpv4NexthopEntry = 24, "SAI_SWITCH_ATTR_AVAILABLE_IPV4_NEXTHOP_ENTRY", default 65_536u32;
        AvailableIpv6NexthopEntry = 25, "SAI_SWITCH_ATTR_AVAILABLE_IPV6_NEXTHOP_ENTRY", default 65_536u32;
        AvailableIpv4NeighborEntry = 26, "SAI_SWITCH_ATTR_AVAILABLE_IPV4_NEIGHBOR_ENTRY", default 65_536u32;
        AvailableIpv6NeighborEntry = 27, "SAI_SWITCH_ATTR_AVAILABLE_IPV6_NEIGHBOR_ENTRY", default 65_536u32;
        AvailableNextHopGroupEntry = 28, "SAI_SWITCH_ATTR_AVAILABLE_NEXT_HOP_GROUP_ENTRY", default 4_096u32;
        AvailableNextHopGroupMemberEntry = 29, "SAI_SWITCH_ATTR_AVAILABLE_NEXT_HOP_GROUP_MEMBER_ENTRY", default 65_536u32;
        AvailableFdbEntry = 30, "SAI_SWITCH_ATTR_AVAILABLE_FDB_ENTRY", default 65_536u32;
    }
}

/// Objects every switch starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    pub cpu_port: PortOid,
    pub virtual_router: VirtualRouterOid,
    pub bridge: BridgeOid,
    pub vlan: VlanOid,
    pub trap_group: HostifTrapGroupOid,
    pub stp: StpOid,
    pub ecmp_hash: HashOid,
    pub lag_hash: HashOid,
}

/// SAI object state. Every API call holds the lock for its whole duration.
#[derive(Default)]
pub(crate) struct State {
    pub ports: HashMap<PortOid, PortRecord>,
    pub lags: HashMap<LagOid, LagRecord>,
    pub lag_members: HashMap<LagMemberOid, LagMemberRecord>,
    pub virtual_routers: HashSet<VirtualRouterOid>,
    pub rifs: HashMap<RouterInterfaceOid, RifRecord>,
    pub my_macs: HashMap<MyMacOid, MyMacRecord>,
    /// Users of each l3-admit router MAC entry.
    pub admitted: HashMap<MacAddress, usize>,
    pub neighbors: HashMap<NeighborEntry, NeighborRecord>,
    pub next_hops: HashMap<NextHopOid, NextHopRecord>,
    pub groups: HashMap<NextHopGroupOid, GroupRecord>,
    pub group_members: HashMap<NextHopGroupMemberOid, GroupMemberRecord>,
    pub routes: HashMap<RouteEntry, RouteRecord>,
    pub hostifs: HashMap<HostifOid, HostifRecord>,
    pub traps: HashMap<HostifTrapOid, TrapRecord>,
    pub trap_groups: HashSet<HostifTrapGroupOid>,
    pub acl_groups: HashMap<AclTableGroupOid, AclGroupRecord>,
    pub acl_group_members: HashMap<AclTableGroupMemberOid, AclGroupMemberRecord>,
    pub acl_tables: HashMap<AclTableOid, AclTableRecord>,
    pub acl_entries: HashMap<AclEntryOid, AclEntryRecord>,
    /// Objects created through the generic path.
    pub generic: HashMap<RawSaiObjectId, ObjectType>,
    pub refs: HashMap<RawSaiObjectId, usize>,
    pub warned: HashSet<ObjectType>,
}

impl State {
    pub fn acquire(&mut self, oid: RawSaiObjectId) {
        *self.refs.entry(oid).or_default() += 1;
    }

    pub fn release(&mut self, oid: RawSaiObjectId) {
        if let Some(count) = self.refs.get_mut(&oid) {
            *count -= 1;
            if *count == 0 {
                self.refs.remove(&oid);
            }
        }
    }

    pub fn ensure_unused(&self, oid: RawSaiObjectId) -> SaiResult<()> {
        match self.refs.get(&oid) {
            Some(n) => Err(SaiError::object_in_use(format!(
                "{} 0x{:016x} has {} users",
                ObjectType::of(oid).map(|t| t.to_string()).unwrap_or_default(),
                oid,
                n
            ))),
            None => Ok(()),
        }
    }

    /// Forwarding port id of a port or LAG.
    pub fn port_like(&self, oid: RawSaiObjectId) -> SaiResult<String> {
        let missing = || SaiError::not_found(format!("port or LAG 0x{:016x}", oid));
        match ObjectType::of(oid) {
            Some(ObjectType::Port) => self
                .ports
                .get(&PortOid::from_raw_unchecked(oid))
                .map(|p| p.fwd.clone())
                .ok_or_else(missing),
            Some(ObjectType::Lag) => self
                .lags
                .get(&LagOid::from_raw_unchecked(oid))
                .map(|l| l.fwd.clone())
                .ok_or_else(missing),
            _ => Err(SaiError::invalid_parameter(format!(
                "0x{:016x} is neither a port nor a LAG",
                oid
            ))),
        }
    }
}

/// A port changed operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortOperEvent {
    pub port: PortOid,
    pub status: PortOperStatus,
}

/// Port oper-status notifications, by SAI port id. Events of ports that are
/// not SAI ports (the CPU port, hostifs) are skipped.
#[derive(Debug)]
pub struct PortEvents {
    sub: Subscription,
    index: Arc<DashMap<String, PortOid>>,
}

impl PortEvents {
    fn map(&self, port: &str, oper: vdp_types::OperState) -> Option<PortOperEvent> {
        self.index.get(port).map(|oid| PortOperEvent {
            port: *oid,
            status: oper.into(),
        })
    }

    /// Next event, or `None` once cancelled.
    pub async fn next(&mut self) -> Option<PortOperEvent> {
        loop {
            let event = self.sub.next().await?;
            if let Some(e) = self.map(&event.port, event.oper) {
                return Some(e);
            }
        }
    }

    pub fn try_next(&mut self) -> Option<PortOperEvent> {
        while let Some(event) = self.sub.try_next() {
            if let Some(e) = self.map(&event.port, event.oper) {
                return Some(e);
            }
        }
        None
    }
}

/// A switch and its forwarding context.
pub struct Switch {
    oid: SwitchOid,
    engine: Arc<Engine>,
    ctx: String,
    config: SwitchConfig,
    seq: AtomicU64,
    attrs: AttributeStore,
    state: Mutex<State>,
    port_index: Arc<DashMap<String, PortOid>>,
    defaults: Defaults,
}

impl Switch {
    /// Creates the forwarding context and bootstraps the switch in it. The
    /// context is deleted again if bootstrapping fails.
    pub fn create(engine: Arc<Engine>, config: SwitchConfig) -> SaiResult<Self> {
        engine.context_create(&config.context)?;
        match Self::bootstrap(engine.clone(), config.clone()) {
            Ok(switch) => {
                info!(context = %config.context, switch = %switch.oid, "switch created");
                Ok(switch)
            }
            Err(e) => {
                let _ = engine.context_delete(&config.context);
                Err(e)
            }
        }
    }

    fn bootstrap(engine: Arc<Engine>, config: SwitchConfig) -> SaiResult<Self> {
        let ctx = config.context.clone();
        pipeline::build(&engine, &ctx)?;
        engine.port_create(&ctx, PortDesc::new(CPU_PORT, PortConfig::Cpu(config.cpu.clone())))?;

        let seq = AtomicU64::new(1);
        let next = |t: ObjectType| t.oid(seq.fetch_add(1, Ordering::Relaxed));
        let oid = SwitchOid::from_raw_unchecked(next(ObjectType::Switch));
        let defaults = Defaults {
            cpu_port: PortOid::from_raw_unchecked(next(ObjectType::Port)),
            virtual_router: VirtualRouterOid::from_raw_unchecked(next(ObjectType::VirtualRouter)),
            bridge: BridgeOid::from_raw_unchecked(next(ObjectType::Bridge)),
            vlan: VlanOid::from_raw_unchecked(next(ObjectType::Vlan)),
            trap_group: HostifTrapGroupOid::from_raw_unchecked(next(ObjectType::HostifTrapGroup)),
            stp: StpOid::from_raw_unchecked(next(ObjectType::Stp)),
            ecmp_hash: HashOid::from_raw_unchecked(next(ObjectType::Hash)),
            lag_hash: HashOid::from_raw_unchecked(next(ObjectType::Hash)),
        };

        let mut state = State::default();
        state.ports.insert(
            defaults.cpu_port,
            PortRecord {
                fwd: CPU_PORT.to_string(),
                lanes: Vec::new(),
                lag: None,
            },
        );
        state.virtual_routers.insert(defaults.virtual_router);
        state.trap_groups.insert(defaults.trap_group);
        for (raw, t) in [
            (defaults.bridge.as_raw(), ObjectType::Bridge),
            (defaults.vlan.as_raw(), ObjectType::Vlan),
            (defaults.stp.as_raw(), ObjectType::Stp),
            (defaults.ecmp_hash.as_raw(), ObjectType::Hash),
            (defaults.lag_hash.as_raw(), ObjectType::Hash),
        ] {
            state.generic.insert(raw, t);
        }

        let attrs = AttributeStore::new();
        let request = SwitchRequest {
            src_mac_address: Some(config.mac),
            ..Default::default()
        };
        attrs.store(oid.as_raw(), request.attributes());
        attrs.store(
            oid.as_raw(),
            vec![
                (SwitchAttr::CpuPort.id(), defaults.cpu_port.into()),
                (SwitchAttr::DefaultVirtualRouterId.id(), defaults.virtual_router.into()),
                (SwitchAttr::Default1QBridgeId.id(), defaults.bridge.into()),
                (SwitchAttr::DefaultVlanId.id(), defaults.vlan.into()),
                (SwitchAttr::DefaultTrapGroup.id(), defaults.trap_group.into()),
                (SwitchAttr::DefaultStpInstId.id(), defaults.stp.into()),
                (SwitchAttr::EcmpHash.id(), defaults.ecmp_hash.into()),
                (SwitchAttr::LagHash.id(), defaults.lag_hash.into()),
                (SwitchAttr::AclEntryMinimumPriority.id(), config.acl.min_priority.into()),
                (SwitchAttr::AclEntryMaximumPriority.id(), config.acl.max_priority.into()),
            ],
        );
        // Default VLAN 1; the remaining defaults carry no attributes.
        attrs.store(defaults.vlan.as_raw(), vec![(0, AttrValue::U16(1))]);
        for raw in [
            defaults.cpu_port.as_raw(),
            defaults.virtual_router.as_raw(),
            defaults.bridge.as_raw(),
            defaults.trap_group.as_raw(),
            defaults.stp.as_raw(),
            defaults.ecmp_hash.as_raw(),
            defaults.lag_hash.as_raw(),
        ] {
            attrs.store(raw, Vec::new());
        }

        let next_seq = seq.load(Ordering::Relaxed);
        Ok(Self {
            oid,
            engine,
            ctx,
            config,
            seq: AtomicU64::new(next_seq),
            attrs,
            state: Mutex::new(state),
            port_index: Arc::new(DashMap::new()),
            defaults,
        })
    }

    pub fn oid(&self) -> SwitchOid {
        self.oid
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Name of the switch's forwarding context.
    pub fn context(&self) -> &str {
        &self.ctx
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attrs
    }

    pub fn port_api(&self) -> PortApi<'_> {
        PortApi::new(self)
    }

    pub fn lag_api(&self) -> LagApi<'_> {
        LagApi::new(self)
    }

    pub fn router_api(&self) -> RouterApi<'_> {
        RouterApi::new(self)
    }

    pub fn neighbor_api(&self) -> NeighborApi<'_> {
        NeighborApi::new(self)
    }

    pub fn next_hop_api(&self) -> NextHopApi<'_> {
        NextHopApi::new(self)
    }

    pub fn route_api(&self) -> RouteApi<'_> {
        RouteApi::new(self)
    }

    pub fn hostif_api(&self) -> HostifApi<'_> {
        HostifApi::new(self)
    }

    pub fn acl_api(&self) -> AclApi<'_> {
        AclApi::new(self)
    }

    pub(crate) fn alloc<T: SaiObjectKind>(&self) -> SaiObjectId<T> {
        SaiObjectId::from_raw_unchecked(self.alloc_raw(T::object_type()))
    }

    /// Id for objects keyed by an entry rather than an id (neighbors,
    /// routes); their attributes are stored under it.
    pub(crate) fn alloc_raw(&self, object_type: ObjectType) -> RawSaiObjectId {
        object_type.oid(self.seq.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    pub(crate) fn port_index(&self) -> &Arc<DashMap<String, PortOid>> {
        &self.port_index
    }

    pub(crate) fn nid(&self, fwd: &str) -> SaiResult<Nid> {
        Ok(self.engine.object_nid(&self.ctx, fwd)?)
    }

    pub(crate) fn add_entry(&self, table: &str, entry: EntryDesc, actions: Vec<Action>) -> SaiResult<()> {
        self.engine.table_entry_add(&self.ctx, table, vec![(entry, actions)])?;
        Ok(())
    }

    pub(crate) fn remove_entry(&self, table: &str, entry: &EntryDesc) -> SaiResult<()> {
        self.engine
            .table_entry_remove(&self.ctx, table, std::slice::from_ref(entry))?;
        Ok(())
    }

    /// Reads switch attributes; port counts and lists are computed live.
    pub fn get_attributes(&self, attrs: &[SwitchAttr]) -> SaiResult<Vec<(SwitchAttr, AttrValue)>> {
        let mut out = self.attrs.read(self.oid.as_raw(), attrs)?;
        let state = self.lock();
        let mut ports: Vec<PortOid> = state
            .ports
            .keys()
            .copied()
            .filter(|p| *p != self.defaults.cpu_port)
            .collect();
        ports.sort();
        for attr in attrs {
            let live = match attr {
                SwitchAttr::PortNumber | SwitchAttr::NumberOfActivePorts => AttrValue::U32(ports.len() as u32),
                SwitchAttr::PortList => ports.clone().into(),
                _ => continue,
            };
            out.push((*attr, live));
        }
        Ok(out)
    }

    pub fn set_attributes(&self, request: &SwitchRequest) -> SaiResult<()> {
        self.attrs.store(self.oid.as_raw(), request.attributes());
        Ok(())
    }

    /// Subscribes to port oper-status changes until `cancel` fires.
    pub fn subscribe_port_events(&self, cancel: CancellationToken) -> SaiResult<PortEvents> {
        Ok(PortEvents {
            sub: self.engine.notify_subscribe(&self.ctx, cancel)?,
            index: self.port_index.clone(),
        })
    }

    /// Deletes the forwarding context, stopping every port worker.
    pub fn shutdown(&self) -> SaiResult<()> {
        self.engine.context_delete(&self.ctx)?;
        info!(context = %self.ctx, "switch removed");
        Ok(())
    }

    /// Creates an object that has no dedicated handler: the id is allocated
    /// and the attributes stored, nothing is programmed.
    pub fn create_object(&self, object_type: ObjectType, attrs: Vec<(u32, AttrValue)>) -> SaiResult<RawSaiObjectId> {
        if has_handler(object_type) {
            return Err(SaiError::invalid_parameter(format!(
                "{} objects are created through their own API",
                object_type
            )));
        }
        let mut state = self.lock();
        if state.warned.insert(object_type) {
            warn!(object_type = %object_type, "no handler, storing attributes only");
        }
        let raw = self.alloc_raw(object_type);
        state.generic.insert(raw, object_type);
        self.attrs.store(raw, attrs);
        Ok(raw)
    }

    pub fn remove_object(&self, oid: RawSaiObjectId) -> SaiResult<()> {
        let mut state = self.lock();
        if !state.generic.contains_key(&oid) {
            return Err(SaiError::not_found(format!("object 0x{:016x}", oid)));
        }
        state.ensure_unused(oid)?;
        state.generic.remove(&oid);
        self.attrs.remove(oid);
        Ok(())
    }

    /// Stores one attribute of any object the switch knows.
    pub fn set_object_attribute(&self, oid: RawSaiObjectId, id: u32, value: AttrValue) -> SaiResult<()> {
        if !self.attrs.contains(oid) {
            return Err(SaiError::not_found(format!("object 0x{:016x}", oid)));
        }
        self.attrs.set(oid, id, value);
        Ok(())
    }

    /// Reads stored attributes of any object the switch knows.
    pub fn get_object_attributes(&self, oid: RawSaiObjectId, ids: &[u32]) -> SaiResult<Vec<(u32, AttrValue)>> {
        if !self.attrs.contains(oid) {
            return Err(SaiError::not_found(format!("object 0x{:016x}", oid)));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.attrs.get(oid, *id).map(|v| (*id, v)))
            .collect())
    }
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switch")
            .field("oid", &self.oid)
            .field("context", &self.ctx)
            .finish()
    }
}

/// Object types served by a dedicated API.
fn has_handler(t: ObjectType) -> bool {
    matches!(
        t,
        ObjectType::Switch
            | ObjectType::Port
            | ObjectType::Lag
            | ObjectType::LagMember
            | ObjectType::VirtualRouter
            | ObjectType::RouterInterface
            | ObjectType::NeighborEntry
            | ObjectType::NextHop
            | ObjectType::NextHopGroup
            | ObjectType::NextHopGroupMember
            | ObjectType::RouteEntry
            | ObjectType::MyMac
            | ObjectType::Hostif
            | ObjectType::HostifTrap
            | ObjectType::HostifTrapGroup
            | ObjectType::AclTableGroup
            | ObjectType::AclTableGroupMember
            | ObjectType::AclTable
            | ObjectType::AclEntry
    )
}
