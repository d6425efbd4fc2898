//! Host interfaces, traps and trap groups.
//!
//! A netdev hostif is a logical port attached to a front-panel port or LAG;
//! frames the host sends through it leave on the attached port. A genetlink
//! hostif punts to the packet sink tagged with its family and group.
//!
//! A trap programs `punt-ether-type` or `punt-ip-proto` so matching packets
//! reach the CPU port with TRAP_ID set to the trap's id.

use crate::api::PacketAction;
use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::{CPU_PORT, PUNT_ETHER_TYPE, PUNT_IP_PROTO};
use crate::sai_attributes;
use crate::switch::Switch;
use crate::types::{HostifOid, HostifTrapGroupOid, HostifTrapOid, RawSaiObjectId};
use tracing::{debug, info};
use vdp_fwd::{Action, Direction, EntryDesc, EntryKey, FieldId, FieldNum, PortConfig, PortDesc};
use vdp_types::AdminState;

const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_LACP: u16 = 0x8809;
const ETHERTYPE_LLDP: u16 = 0x88cc;
const PROTO_TCP: u8 = 6;
const PROTO_ICMPV6: u8 = 58;
const BGP_PORT: u16 = 179;
/// Router solicitation through redirect.
const ND_TYPES: std::ops::RangeInclusive<u8> = 133..=137;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostifType {
    #[default]
    Netdev,
    Genetlink,
}

impl From<HostifType> for AttrValue {
    fn from(v: HostifType) -> Self {
        AttrValue::I32(match v {
            HostifType::Netdev => 0,
            HostifType::Genetlink => 2,
        })
    }
}

/// Host interface request. `name` is the netdev name, or the netlink
/// family for genetlink interfaces.
#[derive(Debug, Clone, Default)]
pub struct HostifRequest {
    pub kind: Option<HostifType>,
    /// Port or LAG a netdev attaches to.
    pub obj_id: Option<RawSaiObjectId>,
    pub name: Option<String>,
    pub oper_status: Option<bool>,
    pub genetlink_mcgrp_name: Option<String>,
}

sai_attributes! {
    pub enum HostifAttr: Hostif for HostifRequest {
        Type = 0, "SAI_HOSTIF_ATTR_TYPE" => kind, default HostifType::Netdev;
        ObjId = 1, "SAI_HOSTIF_ATTR_OBJ_ID";
        Name = 2, "SAI_HOSTIF_ATTR_NAME" => name;
        OperStatus = 3, "SAI_HOSTIF_ATTR_OPER_STATUS" => oper_status, default false;
        GenetlinkMcgrpName = 6, "SAI_HOSTIF_ATTR_GENETLINK_MCGRP_NAME" => genetlink_mcgrp_name;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HostifRecord {
    pub fwd: String,
    pub name: String,
    pub obj: Option<RawSaiObjectId>,
}

/// Trap types with a punt rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostifTrapType {
    Lacp,
    Lldp,
    Arp,
    Ipv6NeighborDiscovery,
    Bgp,
}

impl HostifTrapType {
    /// Punt table entries matching this trap.
    fn entries(&self) -> Vec<(&'static str, EntryDesc)> {
        let ether_type = |t: u16| {
            vec![(
                PUNT_ETHER_TYPE,
                EntryDesc::new(vec![EntryKey::new(FieldNum::EtherType, t.to_be_bytes().to_vec())]),
            )]
        };
        match self {
            HostifTrapType::Lacp => ether_type(ETHERTYPE_LACP),
            HostifTrapType::Lldp => ether_type(ETHERTYPE_LLDP),
            HostifTrapType::Arp => ether_type(ETHERTYPE_ARP),
            HostifTrapType::Ipv6NeighborDiscovery => ND_TYPES
                .map(|t| {
                    (
                        PUNT_IP_PROTO,
                        EntryDesc::flow(
                            0,
                            0,
                            vec![
                                EntryKey::new(FieldNum::IpProto, vec![PROTO_ICMPV6]),
                                EntryKey::new(FieldNum::IcmpType, vec![t]),
                            ],
                        ),
                    )
                })
                .collect(),
            HostifTrapType::Bgp => [FieldNum::L4PortDst, FieldNum::L4PortSrc]
                .into_iter()
                .map(|port_field| {
                    (
                        PUNT_IP_PROTO,
                        EntryDesc::flow(
                            0,
                            0,
                            vec![
                                EntryKey::new(FieldNum::IpProto, vec![PROTO_TCP]),
                                EntryKey::new(port_field, BGP_PORT.to_be_bytes().to_vec()),
                            ],
                        ),
                    )
                })
                .collect(),
        }
    }
}

impl From<HostifTrapType> for AttrValue {
    fn from(v: HostifTrapType) -> Self {
        AttrValue::I32(match v {
            HostifTrapType::Lacp => 0x1,
            HostifTrapType::Lldp => 0x3,
            HostifTrapType::Arp => 0x2000,
            HostifTrapType::Ipv6NeighborDiscovery => 0x2009,
            HostifTrapType::Bgp => 0x4003,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostifTrapRequest {
    pub trap_type: Option<HostifTrapType>,
    pub packet_action: Option<PacketAction>,
    pub trap_priority: Option<u32>,
    pub trap_group: Option<HostifTrapGroupOid>,
}

sai_attributes! {
    pub enum HostifTrapAttr: HostifTrap for HostifTrapRequest {
        TrapType = 0, "SAI_HOSTIF_TRAP_ATTR_TRAP_TYPE" => trap_type;
        PacketAction = 1, "SAI_HOSTIF_TRAP_ATTR_PACKET_ACTION" => packet_action;
        TrapPriority = 2, "SAI_HOSTIF_TRAP_ATTR_TRAP_PRIORITY" => trap_priority, default 0u32;
        TrapGroup = 5, "SAI_HOSTIF_TRAP_ATTR_TRAP_GROUP" => trap_group;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrapRecord {
    pub kind: HostifTrapType,
    pub group: HostifTrapGroupOid,
}

#[derive(Debug, Clone, Default)]
pub struct HostifTrapGroupRequest {
    pub admin_state: Option<bool>,
    pub queue: Option<u32>,
}

sai_attributes! {
    pub enum HostifTrapGroupAttr: HostifTrapGroup for HostifTrapGroupRequest {
        AdminState = 0, "SAI_HOSTIF_TRAP_GROUP_ATTR_ADMIN_STATE" => admin_state, default true;
        Queue = 1, "SAI_HOSTIF_TRAP_GROUP_ATTR_QUEUE" => queue, default 0u32;
    }
}

fn trap_actions(trap: HostifTrapOid, action: PacketAction) -> Vec<Action> {
    match action {
        PacketAction::Trap => vec![
            Action::set_u64(FieldNum::TrapId, trap.as_raw()),
            Action::transmit_now(CPU_PORT),
        ],
        PacketAction::Copy | PacketAction::Log => vec![
            Action::set_u64(FieldNum::TrapId, trap.as_raw()),
            Action::Mirror {
                preserve: vec![FieldId::from(FieldNum::TrapId), FieldId::from(FieldNum::InputIface)],
                port: CPU_PORT.to_string(),
            },
        ],
        PacketAction::Drop | PacketAction::Deny => vec![Action::Drop],
        PacketAction::Forward | PacketAction::Transit => vec![Action::Continue],
    }
}

/// Host interface API.
pub struct HostifApi<'a> {
    switch: &'a Switch,
}

impl<'a> HostifApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    /// Creates a host interface. The name is mandatory; netdevs need the
    /// port or LAG they attach to, genetlink interfaces a multicast group.
    pub fn create_hostif(&self, request: &HostifRequest) -> SaiResult<HostifOid> {
        let sw = self.switch;
        let name = request
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SaiError::missing(HostifAttr::Name.name()))?;
        let kind = request.kind.unwrap_or_default();
        let mut state = sw.lock();
        if state.hostifs.values().any(|h| h.name == name) {
            return Err(SaiError::already_exists(format!("host interface {}", name)));
        }

        let (fwd, config, obj) = match kind {
            HostifType::Netdev => {
                let obj = request
                    .obj_id
                    .ok_or_else(|| SaiError::missing(HostifAttr::ObjId.name()))?;
                let port = state.port_like(obj)?;
                (format!("hostif-{}", name), PortConfig::Hostif { port }, Some(obj))
            }
            HostifType::Genetlink => {
                let group = request
                    .genetlink_mcgrp_name
                    .clone()
                    .ok_or_else(|| SaiError::missing(HostifAttr::GenetlinkMcgrpName.name()))?;
                (
                    format!("genetlink-{}", name),
                    PortConfig::Genetlink {
                        family: name.clone(),
                        group,
                    },
                    None,
                )
            }
        };
        let admin = AdminState::from(request.oper_status.unwrap_or(false));
        sw.engine()
            .port_create(sw.context(), PortDesc::new(fwd.clone(), config).with_admin(admin))?;

        let oid: HostifOid = sw.alloc();
        if let Some(raw) = obj {
            state.acquire(raw);
        }
        state.hostifs.insert(
            oid,
            HostifRecord {
                fwd: fwd.clone(),
                name: name.clone(),
                obj,
            },
        );
        let mut attrs = request.attributes();
        if let Some(raw) = obj {
            attrs.push((HostifAttr::ObjId.id(), AttrValue::Oid(raw)));
        }
        sw.attributes().store(oid.as_raw(), attrs);
        info!(hostif = %oid, name = %name, port = %fwd, "host interface created");
        Ok(oid)
    }

    pub fn remove_hostif(&self, hostif: HostifOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .hostifs
            .get(&hostif)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("host interface {}", hostif)))?;
        sw.engine().object_delete(sw.context(), &record.fwd)?;
        state.hostifs.remove(&hostif);
        if let Some(raw) = record.obj {
            state.release(raw);
        }
        sw.attributes().remove(hostif.as_raw());
        info!(hostif = %hostif, name = %record.name, "host interface removed");
        Ok(())
    }

    /// Brings the host side of the interface up or down.
    pub fn set_oper_status(&self, hostif: HostifOid, up: bool) -> SaiResult<()> {
        let sw = self.switch;
        let fwd = self.fwd(hostif)?;
        sw.engine()
            .port_state(sw.context(), &fwd, Some(AdminState::from(up)))?;
        sw.attributes()
            .set(hostif.as_raw(), HostifAttr::OperStatus.id(), up.into());
        Ok(())
    }

    pub fn get_attributes(&self, hostif: HostifOid, attrs: &[HostifAttr]) -> SaiResult<Vec<(HostifAttr, AttrValue)>> {
        self.switch.attributes().read(hostif.as_raw(), attrs)
    }

    /// Sends a frame from the host: it leaves through the attached port.
    pub fn send(&self, hostif: HostifOid, frame: &[u8]) -> SaiResult<()> {
        let sw = self.switch;
        let fwd = self.fwd(hostif)?;
        sw.engine()
            .packet_inject(sw.context(), &fwd, Direction::Egress, frame, &[])?;
        Ok(())
    }

    pub fn hostifs(&self) -> Vec<HostifOid> {
        self.switch.lock().hostifs.keys().copied().collect()
    }

    fn fwd(&self, hostif: HostifOid) -> SaiResult<String> {
        self.switch
            .lock()
            .hostifs
            .get(&hostif)
            .map(|h| h.fwd.clone())
            .ok_or_else(|| SaiError::not_found(format!("host interface {}", hostif)))
    }

    pub fn create_trap_group(&self, request: &HostifTrapGroupRequest) -> SaiResult<HostifTrapGroupOid> {
        let sw = self.switch;
        let oid: HostifTrapGroupOid = sw.alloc();
        sw.lock().trap_groups.insert(oid);
        sw.attributes().store(oid.as_raw(), request.attributes());
        debug!(trap_group = %oid, "trap group created");
        Ok(oid)
    }

    /// Removes a trap group. The default group stays.
    pub fn remove_trap_group(&self, group: HostifTrapGroupOid) -> SaiResult<()> {
        let sw = self.switch;
        if group == sw.defaults().trap_group {
            return Err(SaiError::invalid_parameter("the default trap group cannot be removed"));
        }
        let mut state = sw.lock();
        if !state.trap_groups.contains(&group) {
            return Err(SaiError::not_found(format!("trap group {}", group)));
        }
        state.ensure_unused(group.as_raw())?;
        state.trap_groups.remove(&group);
        sw.attributes().remove(group.as_raw());
        Ok(())
    }

    pub fn get_trap_group_attributes(
        &self,
        group: HostifTrapGroupOid,
        attrs: &[HostifTrapGroupAttr],
    ) -> SaiResult<Vec<(HostifTrapGroupAttr, AttrValue)>> {
        self.switch.attributes().read(group.as_raw(), attrs)
    }

    /// Creates a trap. Type and packet action are mandatory; one trap per
    /// type.
    pub fn create_trap(&self, request: &HostifTrapRequest) -> SaiResult<HostifTrapOid> {
        let sw = self.switch;
        let kind = request
            .trap_type
            .ok_or_else(|| SaiError::missing(HostifTrapAttr::TrapType.name()))?;
        let action = request
            .packet_action
            .ok_or_else(|| SaiError::missing(HostifTrapAttr::PacketAction.name()))?;
        let group = request.trap_group.unwrap_or(sw.defaults().trap_group);

        let mut state = sw.lock();
        if !state.trap_groups.contains(&group) {
            return Err(SaiError::not_found(format!("trap group {}", group)));
        }
        if state.traps.values().any(|t| t.kind == kind) {
            return Err(SaiError::already_exists(format!("trap {:?}", kind)));
        }
        let oid: HostifTrapOid = sw.alloc();
        let entries: Vec<_> = kind
            .entries()
            .into_iter()
            .map(|(table, entry)| (table, entry, trap_actions(oid, action)))
            .collect();
        for (i, (table, entry, actions)) in entries.iter().enumerate() {
            if let Err(e) = sw.add_entry(table, entry.clone(), actions.clone()) {
                for (table, entry, _) in &entries[..i] {
                    let _ = sw.remove_entry(table, entry);
                }
                return Err(e);
            }
        }
        state.acquire(group.as_raw());
        state.traps.insert(oid, TrapRecord { kind, group });
        let mut attrs = request.attributes();
        attrs.push((HostifTrapAttr::TrapGroup.id(), group.into()));
        sw.attributes().store(oid.as_raw(), attrs);
        info!(trap = %oid, kind = ?kind, action = ?action, "trap created");
        Ok(oid)
    }

    pub fn set_trap_action(&self, trap: HostifTrapOid, action: PacketAction) -> SaiResult<()> {
        let sw = self.switch;
        let state = sw.lock();
        let record = state
            .traps
            .get(&trap)
            .ok_or_else(|| SaiError::not_found(format!("trap {}", trap)))?;
        for (table, entry) in record.kind.entries() {
            sw.add_entry(table, entry, trap_actions(trap, action))?;
        }
        sw.attributes()
            .set(trap.as_raw(), HostifTrapAttr::PacketAction.id(), action.into());
        Ok(())
    }

    pub fn remove_trap(&self, trap: HostifTrapOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .traps
            .remove(&trap)
            .ok_or_else(|| SaiError::not_found(format!("trap {}", trap)))?;
        for (table, entry) in record.kind.entries() {
            sw.remove_entry(table, &entry)?;
        }
        state.release(record.group.as_raw());
        sw.attributes().remove(trap.as_raw());
        Ok(())
    }

    pub fn get_trap_attributes(&self, trap: HostifTrapOid, attrs: &[HostifTrapAttr]) -> SaiResult<Vec<(HostifTrapAttr, AttrValue)>> {
        self.switch.attributes().read(trap.as_raw(), attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::SwitchConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vdp_fwd::{Engine, InfoRequest, LoopbackLinks};

    fn switch() -> Switch {
        let engine = Arc::new(Engine::new(Arc::new(LoopbackLinks::new())));
        Switch::create(engine, SwitchConfig::default()).unwrap()
    }

    fn table_len(sw: &Switch, table: &str) -> usize {
        let reply = sw
            .engine()
            .info(
                sw.context(),
                InfoRequest::Get {
                    id: table.to_string(),
                },
            )
            .unwrap();
        reply.lines[0].split_whitespace().nth(4).unwrap().parse().unwrap()
    }

    #[test]
    fn test_neighbor_discovery_entries() {
        let entries = HostifTrapType::Ipv6NeighborDiscovery.entries();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|(t, _)| *t == PUNT_IP_PROTO));
        assert_eq!(HostifTrapType::Bgp.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_trap_lifecycle() {
        let sw = switch();
        let api = sw.hostif_api();
        let group = api.create_trap_group(&HostifTrapGroupRequest::default()).unwrap();
        let arp = api
            .create_trap(&HostifTrapRequest {
                trap_type: Some(HostifTrapType::Arp),
                packet_action: Some(PacketAction::Trap),
                trap_group: Some(group),
                ..Default::default()
            })
            .unwrap();
        let nd = api
            .create_trap(&HostifTrapRequest {
                trap_type: Some(HostifTrapType::Ipv6NeighborDiscovery),
                packet_action: Some(PacketAction::Copy),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(table_len(&sw, PUNT_ETHER_TYPE), 1);
        assert_eq!(table_len(&sw, PUNT_IP_PROTO), 5);

        let dup = HostifTrapRequest {
            trap_type: Some(HostifTrapType::Arp),
            packet_action: Some(PacketAction::Drop),
            ..Default::default()
        };
        assert_eq!(
            api.create_trap(&dup).unwrap_err().status(),
            crate::SaiStatus::ItemAlreadyExists
        );
        assert!(api.remove_trap_group(group).is_err());
        assert!(api.remove_trap_group(sw.defaults().trap_group).is_err());

        api.set_trap_action(arp, PacketAction::Drop).unwrap();
        assert_eq!(
            api.get_trap_attributes(arp, &[HostifTrapAttr::PacketAction, HostifTrapAttr::TrapGroup])
                .unwrap(),
            vec![
                (HostifTrapAttr::PacketAction, AttrValue::I32(0)),
                (HostifTrapAttr::TrapGroup, AttrValue::Oid(group.as_raw())),
            ]
        );

        api.remove_trap(arp).unwrap();
        api.remove_trap(nd).unwrap();
        assert_eq!(table_len(&sw, PUNT_ETHER_TYPE), 0);
        assert_eq!(table_len(&sw, PUNT_IP_PROTO), 0);
        api.remove_trap_group(group).unwrap();
        sw.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_genetlink_hostif() {
        let sw = switch();
        let api = sw.hostif_api();
        let missing_group = HostifRequest {
            kind: Some(HostifType::Genetlink),
            name: Some("psample".to_string()),
            ..Default::default()
        };
        assert!(api.create_hostif(&missing_group).is_err());

        let hostif = api
            .create_hostif(&HostifRequest {
                genetlink_mcgrp_name: Some("packets".to_string()),
                ..missing_group
            })
            .unwrap();
        assert_eq!(api.hostifs(), vec![hostif]);
        assert_eq!(
            api.get_attributes(hostif, &[HostifAttr::Type, HostifAttr::Name]).unwrap(),
            vec![
                (HostifAttr::Type, AttrValue::I32(2)),
                (HostifAttr::Name, AttrValue::Str("psample".to_string())),
            ]
        );
        api.remove_hostif(hostif).unwrap();
        assert!(api.hostifs().is_empty());
        sw.shutdown().unwrap();
    }
}
