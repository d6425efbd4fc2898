//! Route entries: `(virtual router, prefix)` in `fib-v4` or `fib-v6`.

use crate::api::next_hop::{via_group, via_next_hop};
use crate::api::PacketAction;
use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::{CPU_PORT, FIB_V4, FIB_V6, NEIGHBOR};
use crate::sai_attributes;
use crate::switch::{State, Switch};
use crate::types::{
    NextHopGroupOid, NextHopOid, ObjectType, RawSaiObjectId, RouterInterfaceOid, VirtualRouterOid,
};
use std::fmt;
use tracing::{debug, info};
use vdp_fwd::{Action, EntryDesc, EntryKey, FieldId, FieldNum};
use vdp_types::IpPrefix;

/// Key of a route entry. The destination is kept in network form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    pub vr: VirtualRouterOid,
    pub destination: IpPrefix,
}

impl RouteEntry {
    pub fn new(vr: VirtualRouterOid, destination: IpPrefix) -> SaiResult<Self> {
        let destination = IpPrefix::new(destination.network(), destination.prefix_len())
            .map_err(|e| SaiError::invalid_parameter(e.to_string()))?;
        Ok(Self { vr, destination })
    }

    fn table(&self) -> &'static str {
        if self.destination.is_ipv4() {
            FIB_V4
        } else {
            FIB_V6
        }
    }

    fn table_entry(&self) -> EntryDesc {
        EntryDesc::new(vec![
            EntryKey::new(FieldNum::PacketVrf, self.vr.to_bytes()),
            EntryKey::prefix(
                FieldNum::IpAddrDst,
                self.destination.address().octets(),
                usize::from(self.destination.prefix_len()),
            ),
        ])
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.destination, self.vr)
    }
}

/// Route request. A forward route without a next hop drops.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub packet_action: Option<PacketAction>,
    /// Next hop, next-hop group, router interface or the CPU port.
    pub next_hop_id: Option<RawSaiObjectId>,
}

sai_attributes! {
    pub enum RouteAttr: RouteEntry for RouteRequest {
        PacketAction = 0, "SAI_ROUTE_ENTRY_ATTR_PACKET_ACTION" => packet_action, default PacketAction::Forward;
        NextHopId = 2, "SAI_ROUTE_ENTRY_ATTR_NEXT_HOP_ID";
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RouteRecord {
    pub oid: RawSaiObjectId,
    pub action: PacketAction,
    pub target: Option<RawSaiObjectId>,
}

/// Actions a route to `target` runs.
fn forward_actions(sw: &Switch, state: &State, target: Option<RawSaiObjectId>) -> SaiResult<Vec<Action>> {
    let Some(raw) = target.filter(|raw| *raw != 0) else {
        return Ok(vec![Action::Drop]);
    };
    let missing = |what: &str| SaiError::not_found(format!("{} 0x{:016x}", what, raw));
    match ObjectType::of(raw) {
        Some(ObjectType::NextHop) => {
            let nh = NextHopOid::from_raw_unchecked(raw);
            if !state.next_hops.contains_key(&nh) {
                return Err(missing("next hop"));
            }
            Ok(via_next_hop(nh))
        }
        Some(ObjectType::NextHopGroup) => {
            let group = NextHopGroupOid::from_raw_unchecked(raw);
            if !state.groups.contains_key(&group) {
                return Err(missing("next hop group"));
            }
            Ok(via_group(group))
        }
        Some(ObjectType::RouterInterface) => {
            let rif = RouterInterfaceOid::from_raw_unchecked(raw);
            let record = state.rifs.get(&rif).ok_or_else(|| missing("router interface"))?;
            Ok(match record.fwd_port() {
                // Connected subnet: the destination itself is the next hop.
                Some(port) => vec![
                    Action::transmit(port),
                    Action::set_u64(FieldNum::OutputIface, raw),
                    Action::copy(FieldNum::NextHopIp, FieldNum::IpAddrDst),
                    Action::dec(FieldNum::IpHop, 1),
                    Action::lookup(NEIGHBOR),
                ],
                None => vec![Action::transmit_now(CPU_PORT)],
            })
        }
        Some(ObjectType::Port) if raw == sw.defaults().cpu_port.as_raw() => Ok(vec![Action::transmit_now(CPU_PORT)]),
        _ => Err(SaiError::invalid_parameter(format!(
            "0x{:016x} cannot be a route next hop",
            raw
        ))),
    }
}

fn route_actions(sw: &Switch, state: &State, action: PacketAction, target: Option<RawSaiObjectId>) -> SaiResult<Vec<Action>> {
    match action {
        PacketAction::Drop | PacketAction::Deny => Ok(vec![Action::Drop]),
        PacketAction::Trap => Ok(vec![Action::transmit_now(CPU_PORT)]),
        PacketAction::Forward | PacketAction::Transit => forward_actions(sw, state, target),
        PacketAction::Copy | PacketAction::Log => {
            let mut actions = vec![Action::Mirror {
                preserve: vec![FieldId::from(FieldNum::InputIface)],
                port: CPU_PORT.to_string(),
            }];
            actions.extend(forward_actions(sw, state, target)?);
            Ok(actions)
        }
    }
}

/// Route API.
pub struct RouteApi<'a> {
    switch: &'a Switch,
}

impl<'a> RouteApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    /// Creates a route. The virtual router and the next hop must exist.
    pub fn create_route(&self, entry: &RouteEntry, request: &RouteRequest) -> SaiResult<()> {
        let sw = self.switch;
        let action = request.packet_action.unwrap_or_default();
        let mut state = sw.lock();
        if !state.virtual_routers.contains(&entry.vr) {
            return Err(SaiError::not_found(format!("virtual router {}", entry.vr)));
        }
        if state.routes.contains_key(entry) {
            return Err(SaiError::already_exists(format!("route {}", entry)));
        }
        let actions = route_actions(sw, &state, action, request.next_hop_id)?;
        sw.add_entry(entry.table(), entry.table_entry(), actions)?;

        let target = request.next_hop_id.filter(|raw| *raw != 0);
        let oid = sw.alloc_raw(ObjectType::RouteEntry);
        state.acquire(entry.vr.as_raw());
        if let Some(raw) = target {
            state.acquire(raw);
        }
        state.routes.insert(*entry, RouteRecord { oid, action, target });
        let mut attrs = request.attributes();
        attrs.push((RouteAttr::NextHopId.id(), AttrValue::Oid(target.unwrap_or(0))));
        sw.attributes().store(oid, attrs);
        debug!(route = %entry, action = ?action, "route created");
        Ok(())
    }

    pub fn remove_route(&self, entry: &RouteEntry) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .routes
            .get(entry)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("route {}", entry)))?;
        sw.remove_entry(entry.table(), &entry.table_entry())?;
        state.routes.remove(entry);
        state.release(entry.vr.as_raw());
        if let Some(raw) = record.target {
            state.release(raw);
        }
        sw.attributes().remove(record.oid);
        debug!(route = %entry, "route removed");
        Ok(())
    }

    /// Re-programs a route with a new packet action, next hop, or both.
    pub fn set_route(&self, entry: &RouteEntry, request: &RouteRequest) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .routes
            .get(entry)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("route {}", entry)))?;
        let action = request.packet_action.unwrap_or(record.action);
        let target = match request.next_hop_id {
            Some(raw) => Some(raw).filter(|raw| *raw != 0),
            None => record.target,
        };
        let actions = route_actions(sw, &state, action, target)?;
        sw.add_entry(entry.table(), entry.table_entry(), actions)?;

        if target != record.target {
            if let Some(raw) = target {
                state.acquire(raw);
            }
            if let Some(raw) = record.target {
                state.release(raw);
            }
        }
        state.routes.insert(*entry, RouteRecord { oid: record.oid, action, target });
        sw.attributes().set(record.oid, RouteAttr::PacketAction.id(), action.into());
        sw.attributes()
            .set(record.oid, RouteAttr::NextHopId.id(), AttrValue::Oid(target.unwrap_or(0)));
        info!(route = %entry, action = ?action, "route updated");
        Ok(())
    }

    pub fn get_attributes(&self, entry: &RouteEntry, attrs: &[RouteAttr]) -> SaiResult<Vec<(RouteAttr, AttrValue)>> {
        let oid = self
            .switch
            .lock()
            .routes
            .get(entry)
            .map(|r| r.oid)
            .ok_or_else(|| SaiError::not_found(format!("route {}", entry)))?;
        self.switch.attributes().read(oid, attrs)
    }

    pub fn routes(&self) -> Vec<RouteEntry> {
        self.switch.lock().routes.keys().copied().collect()
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

    fn fib_lines(sw: &Switch, table: &str) -> Vec<String> {
        sw.engine()
            .info(
                sw.context(),
                InfoRequest::Get {
                    id: table.to_string(),
                },
            )
            .unwrap()
            .lines
    }

    #[test]
    fn test_entry_is_normalized() {
        let vr = VirtualRouterOid::from_raw_unchecked(ObjectType::VirtualRouter.oid(2));
        let entry = RouteEntry::new(vr, "10.1.2.3/8".parse().unwrap()).unwrap();
        assert_eq!(entry.destination.to_string(), "10.0.0.0/8");
        assert_eq!(entry.table(), FIB_V4);
    }

    #[tokio::test]
    async fn test_route_lifecycle() {
        let sw = switch();
        let api = sw.route_api();
        let vr = sw.defaults().virtual_router;
        let entry = RouteEntry::new(vr, "2003::10/128".parse().unwrap()).unwrap();

        let bogus = RouteRequest {
            next_hop_id: Some(ObjectType::NextHop.oid(999)),
            ..Default::default()
        };
        assert!(api.create_route(&entry, &bogus).unwrap_err().is_not_found());

        let to_cpu = RouteRequest {
            next_hop_id: Some(sw.defaults().cpu_port.as_raw()),
            ..Default::default()
        };
        api.create_route(&entry, &to_cpu).unwrap();
        assert!(fib_lines(&sw, FIB_V6)[0].ends_with("with 1 entries"));
        assert_eq!(
            api.create_route(&entry, &to_cpu).unwrap_err().status(),
            crate::SaiStatus::ItemAlreadyExists
        );

        api.set_route(
            &entry,
            &RouteRequest {
                packet_action: Some(PacketAction::Drop),
                ..Default::default()
            },
        )
        .unwrap();
        let got = api
            .get_attributes(&entry, &[RouteAttr::PacketAction, RouteAttr::NextHopId])
            .unwrap();
        assert_eq!(
            got,
            vec![
                (RouteAttr::PacketAction, AttrValue::I32(0)),
                (RouteAttr::NextHopId, AttrValue::Oid(sw.defaults().cpu_port.as_raw())),
            ]
        );

        api.remove_route(&entry).unwrap();
        assert!(api.routes().is_empty());
        assert!(fib_lines(&sw, FIB_V6)[0].ends_with("with 0 entries"));
        sw.shutdown().unwrap();
    }
}
