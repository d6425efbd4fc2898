//! Neighbor entries: `(router interface, IP) → MAC` in the `neighbor` table.

use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::NEIGHBOR;
use crate::sai_attributes;
use crate::switch::Switch;
use crate::types::{ObjectType, RawSaiObjectId, RouterInterfaceOid};
use std::fmt;
use tracing::debug;
use vdp_fwd::{Action, EntryDesc, EntryKey, FieldNum};
use vdp_types::{IpAddress, MacAddress};

/// Key of a neighbor entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NeighborEntry {
    pub rif: RouterInterfaceOid,
    pub ip: IpAddress,
}

impl NeighborEntry {
    pub fn new(rif: RouterInterfaceOid, ip: IpAddress) -> Self {
        Self { rif, ip }
    }

    fn table_entry(&self) -> EntryDesc {
        EntryDesc::new(vec![
            EntryKey::new(FieldNum::OutputIface, self.rif.to_bytes()),
            EntryKey::new(FieldNum::NextHopIp, self.ip.octets()),
        ])
    }
}

impl fmt::Display for NeighborEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.rif)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NeighborRequest {
    pub dst_mac_address: Option<MacAddress>,
    pub no_host_route: Option<bool>,
}

sai_attributes! {
    pub enum NeighborAttr: NeighborEntry for NeighborRequest {
        DstMacAddress = 0, "SAI_NEIGHBOR_ENTRY_ATTR_DST_MAC_ADDRESS" => dst_mac_address;
        NoHostRoute = 3, "SAI_NEIGHBOR_ENTRY_ATTR_NO_HOST_ROUTE" => no_host_route, default false;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NeighborRecord {
    /// Id the entry's attributes are stored under.
    pub oid: RawSaiObjectId,
}

/// Neighbor API.
pub struct NeighborApi<'a> {
    switch: &'a Switch,
}

impl<'a> NeighborApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    /// Creates a neighbor entry. The destination MAC is mandatory.
    pub fn create_neighbor(&self, entry: &NeighborEntry, request: &NeighborRequest) -> SaiResult<()> {
        let sw = self.switch;
        let mac = request
            .dst_mac_address
            .ok_or_else(|| SaiError::missing(NeighborAttr::DstMacAddress.name()))?;
        let mut state = sw.lock();
        if !state.rifs.contains_key(&entry.rif) {
            return Err(SaiError::not_found(format!("router interface {}", entry.rif)));
        }
        if state.neighbors.contains_key(entry) {
            return Err(SaiError::already_exists(format!("neighbor {}", entry)));
        }
        sw.add_entry(
            NEIGHBOR,
            entry.table_entry(),
            vec![Action::set(FieldNum::EtherMacDst, mac.octets().to_vec())],
        )?;
        let oid = sw.alloc_raw(ObjectType::NeighborEntry);
        state.acquire(entry.rif.as_raw());
        state.neighbors.insert(*entry, NeighborRecord { oid });
        sw.attributes().store(oid, request.attributes());
        debug!(neighbor = %entry, mac = %mac, "neighbor created");
        Ok(())
    }

    pub fn remove_neighbor(&self, entry: &NeighborEntry) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .neighbors
            .get(entry)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("neighbor {}", entry)))?;
        sw.remove_entry(NEIGHBOR, &entry.table_entry())?;
        state.neighbors.remove(entry);
        state.release(entry.rif.as_raw());
        sw.attributes().remove(record.oid);
        debug!(neighbor = %entry, "neighbor removed");
        Ok(())
    }

    pub fn set_dst_mac(&self, entry: &NeighborEntry, mac: MacAddress) -> SaiResult<()> {
        let sw = self.switch;
        let state = sw.lock();
        let record = state
            .neighbors
            .get(entry)
            .ok_or_else(|| SaiError::not_found(format!("neighbor {}", entry)))?;
        sw.add_entry(
            NEIGHBOR,
            entry.table_entry(),
            vec![Action::set(FieldNum::EtherMacDst, mac.octets().to_vec())],
        )?;
        sw.attributes()
            .set(record.oid, NeighborAttr::DstMacAddress.id(), mac.into());
        Ok(())
    }

    pub fn get_attributes(&self, entry: &NeighborEntry, attrs: &[NeighborAttr]) -> SaiResult<Vec<(NeighborAttr, AttrValue)>> {
        let oid = self
            .switch
            .lock()
            .neighbors
            .get(entry)
            .map(|r| r.oid)
            .ok_or_else(|| SaiError::not_found(format!("neighbor {}", entry)))?;
        self.switch.attributes().read(oid, attrs)
    }

    pub fn neighbors(&self) -> Vec<NeighborEntry> {
        self.switch.lock().neighbors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router::{RouterInterfaceRequest, RouterInterfaceType};
    use crate::switch::SwitchConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vdp_fwd::{Engine, LoopbackLinks};

    #[tokio::test]
    async fn test_neighbor_lifecycle() {
        let engine = Arc::new(Engine::new(Arc::new(LoopbackLinks::new())));
        let sw = Switch::create(engine, SwitchConfig::default()).unwrap();
        let rif = sw
            .router_api()
            .create_router_interface(&RouterInterfaceRequest {
                virtual_router_id: Some(sw.defaults().virtual_router),
                kind: Some(RouterInterfaceType::Loopback),
                ..Default::default()
            })
            .unwrap();
        let api = sw.neighbor_api();
        let entry = NeighborEntry::new(rif, "10.0.0.2".parse().unwrap());
        let mac: MacAddress = "10:10:10:10:10:12".parse().unwrap();

        assert!(api.create_neighbor(&entry, &NeighborRequest::default()).is_err());
        let req = NeighborRequest {
            dst_mac_address: Some(mac),
            ..Default::default()
        };
        api.create_neighbor(&entry, &req).unwrap();
        let dup = api.create_neighbor(&entry, &req).unwrap_err();
        assert_eq!(dup.status(), crate::SaiStatus::ItemAlreadyExists);
        assert!(sw.router_api().remove_router_interface(rif).is_err());

        let got = api
            .get_attributes(&entry, &[NeighborAttr::DstMacAddress, NeighborAttr::NoHostRoute])
            .unwrap();
        assert_eq!(
            got,
            vec![
                (NeighborAttr::DstMacAddress, AttrValue::Mac(mac)),
                (NeighborAttr::NoHostRoute, AttrValue::Bool(false)),
            ]
        );

        api.remove_neighbor(&entry).unwrap();
        assert!(api.remove_neighbor(&entry).unwrap_err().is_not_found());
        sw.router_api().remove_router_interface(rif).unwrap();
        sw.shutdown().unwrap();
    }
}
