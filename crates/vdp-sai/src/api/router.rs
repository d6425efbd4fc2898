//! Virtual routers, router interfaces and MyMAC entries.
//!
//! A router interface on a port programs three entries:
//!
//! - `input-iface`: the port's NID → INPUT_IFACE and PACKET_VRF
//! - `src-mac`: OUTPUT_IFACE → ETHER_MAC_SRC
//! - `l3-admit`: the interface MAC, shared by every interface using it

use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::{INPUT_IFACE, L3_ADMIT, SRC_MAC};
use crate::sai_attributes;
use crate::switch::{State, Switch, SwitchAttr};
use crate::types::{MyMacOid, RawSaiObjectId, RouterInterfaceOid, VirtualRouterOid};
use tracing::info;
use vdp_fwd::{Action, EntryDesc, EntryKey, FieldNum, Nid};
use vdp_types::{bytes, MacAddress};

/// Priority of the l3-admit entries of router interface MACs; MyMAC
/// entries must rank above it.
const RIF_ADMIT_PRIORITY: u32 = u32::MAX;

#[derive(Debug, Clone, Default)]
pub struct VirtualRouterRequest {
    pub src_mac_address: Option<MacAddress>,
    pub admin_v4_state: Option<bool>,
    pub admin_v6_state: Option<bool>,
}

sai_attributes! {
    pub enum VirtualRouterAttr: VirtualRouter for VirtualRouterRequest {
        AdminV4State = 0, "SAI_VIRTUAL_ROUTER_ATTR_ADMIN_V4_STATE" => admin_v4_state, default true;
        AdminV6State = 1, "SAI_VIRTUAL_ROUTER_ATTR_ADMIN_V6_STATE" => admin_v6_state, default true;
        SrcMacAddress = 2, "SAI_VIRTUAL_ROUTER_ATTR_SRC_MAC_ADDRESS" => src_mac_address;
    }
}

/// Router interface types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RouterInterfaceType {
    #[default]
    Port,
    Vlan,
    Loopback,
    SubPort,
}

impl From<RouterInterfaceType> for AttrValue {
    fn from(v: RouterInterfaceType) -> Self {
        AttrValue::I32(match v {
            RouterInterfaceType::Port => 0,
            RouterInterfaceType::Vlan => 1,
            RouterInterfaceType::Loopback => 2,
            RouterInterfaceType::SubPort => 6,
        })
    }
}

/// Router interface creation request. The virtual router is mandatory, and
/// so is the port (a port or LAG id) of port interfaces.
#[derive(Debug, Clone, Default)]
pub struct RouterInterfaceRequest {
    pub virtual_router_id: Option<VirtualRouterOid>,
    pub kind: Option<RouterInterfaceType>,
    pub port_id: Option<RawSaiObjectId>,
    pub src_mac_address: Option<MacAddress>,
    pub outer_vlan_id: Option<u16>,
    pub mtu: Option<u32>,
}

sai_attributes! {
    pub enum RouterInterfaceAttr: RouterInterface for RouterInterfaceRequest {
        VirtualRouterId = 0, "SAI_ROUTER_INTERFACE_ATTR_VIRTUAL_ROUTER_ID" => virtual_router_id;
        Type = 1, "SAI_ROUTER_INTERFACE_ATTR_TYPE" => kind, default RouterInterfaceType::Port;
        PortId = 2, "SAI_ROUTER_INTERFACE_ATTR_PORT_ID";
        SrcMacAddress = 5, "SAI_ROUTER_INTERFACE_ATTR_SRC_MAC_ADDRESS" => src_mac_address;
        OuterVlanId = 6, "SAI_ROUTER_INTERFACE_ATTR_OUTER_VLAN_ID" => outer_vlan_id;
        Mtu = 12, "SAI_ROUTER_INTERFACE_ATTR_MTU" => mtu, default 1514u32;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RifRecord {
    pub vr: VirtualRouterOid,
    pub kind: RouterInterfaceType,
    /// Port or LAG id, and its forwarding port, for port interfaces.
    pub port: Option<(RawSaiObjectId, String)>,
    pub nid: Nid,
    pub mac: MacAddress,
}

impl RifRecord {
    /// Forwarding port packets routed out of this interface leave on.
    pub fn fwd_port(&self) -> Option<&str> {
        self.port.as_ref().map(|(_, fwd)| fwd.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MyMacRequest {
    pub mac_address: Option<MacAddress>,
    pub mac_address_mask: Option<MacAddress>,
    pub priority: Option<u32>,
}

sai_attributes! {
    pub enum MyMacAttr: MyMac for MyMacRequest {
        Priority = 0, "SAI_MY_MAC_ATTR_PRIORITY" => priority, default 0u32;
        MacAddress = 3, "SAI_MY_MAC_ATTR_MAC_ADDRESS" => mac_address;
        MacAddressMask = 4, "SAI_MY_MAC_ATTR_MAC_ADDRESS_MASK" => mac_address_mask;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MyMacRecord {
    pub entry: EntryDesc,
}

fn input_iface_entry(nid: Nid) -> EntryDesc {
    EntryDesc::new(vec![EntryKey::new(FieldNum::PacketPortInput, bytes::from_u64(nid))])
}

fn src_mac_entry(rif: RouterInterfaceOid) -> EntryDesc {
    EntryDesc::new(vec![EntryKey::new(FieldNum::OutputIface, rif.to_bytes())])
}

fn admit_entry(mac: MacAddress) -> EntryDesc {
    EntryDesc::flow(
        0,
        RIF_ADMIT_PRIORITY,
        vec![EntryKey::new(FieldNum::EtherMacDst, mac.octets().to_vec())],
    )
}

/// Router API.
pub struct RouterApi<'a> {
    switch: &'a Switch,
}

impl<'a> RouterApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    pub fn create_virtual_router(&self, request: &VirtualRouterRequest) -> SaiResult<VirtualRouterOid> {
        let sw = self.switch;
        let mut state = sw.lock();
        let oid = sw.alloc();
        state.virtual_routers.insert(oid);
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(vr = %oid, "virtual router created");
        Ok(oid)
    }

    pub fn remove_virtual_router(&self, vr: VirtualRouterOid) -> SaiResult<()> {
        let sw = self.switch;
        if vr == sw.defaults().virtual_router {
            return Err(SaiError::invalid_parameter("the default virtual router cannot be removed"));
        }
        let mut state = sw.lock();
        if !state.virtual_routers.contains(&vr) {
            return Err(SaiError::not_found(format!("virtual router {}", vr)));
        }
        state.ensure_unused(vr.as_raw())?;
        state.virtual_routers.remove(&vr);
        sw.attributes().remove(vr.as_raw());
        Ok(())
    }

    pub fn get_virtual_router_attributes(
        &self,
        vr: VirtualRouterOid,
        attrs: &[VirtualRouterAttr],
    ) -> SaiResult<Vec<(VirtualRouterAttr, AttrValue)>> {
        self.switch.attributes().read(vr.as_raw(), attrs)
    }

    /// Source MAC of interfaces created without one.
    fn default_mac(&self) -> MacAddress {
        let sw = self.switch;
        match sw.attributes().get(sw.oid().as_raw(), SwitchAttr::SrcMacAddress.id()) {
            Some(AttrValue::Mac(mac)) => mac,
            _ => sw.config().mac,
        }
    }

    fn admit(&self, state: &mut State, mac: MacAddress) -> SaiResult<()> {
        if !state.admitted.contains_key(&mac) {
            self.switch.add_entry(L3_ADMIT, admit_entry(mac), vec![Action::Continue])?;
        }
        *state.admitted.entry(mac).or_default() += 1;
        Ok(())
    }

    fn unadmit(&self, state: &mut State, mac: MacAddress) -> SaiResult<()> {
        if let Some(users) = state.admitted.get_mut(&mac) {
            *users -= 1;
            if *users == 0 {
                state.admitted.remove(&mac);
                self.switch.remove_entry(L3_ADMIT, &admit_entry(mac))?;
            }
        }
        Ok(())
    }

    /// Creates a router interface.
    ///
    /// # Errors
    ///
    /// Sub-port and VLAN interfaces are not supported. A port carries at
    /// most one interface.
    pub fn create_router_interface(&self, request: &RouterInterfaceRequest) -> SaiResult<RouterInterfaceOid> {
        let sw = self.switch;
        let vr = request
            .virtual_router_id
            .ok_or_else(|| SaiError::missing(RouterInterfaceAttr::VirtualRouterId.name()))?;
        let kind = request.kind.unwrap_or_default();
        if matches!(kind, RouterInterfaceType::SubPort | RouterInterfaceType::Vlan) {
            return Err(SaiError::not_supported(format!("{:?} router interfaces", kind)));
        }
        let mac = request.src_mac_address.unwrap_or_else(|| self.default_mac());

        let mut state = sw.lock();
        if !state.virtual_routers.contains(&vr) {
            return Err(SaiError::not_found(format!("virtual router {}", vr)));
        }
        let oid: RouterInterfaceOid = sw.alloc();
        let record = match kind {
            RouterInterfaceType::Port => {
                let port = request
                    .port_id
                    .ok_or_else(|| SaiError::missing(RouterInterfaceAttr::PortId.name()))?;
                let fwd = state.port_like(port)?;
                if state.rifs.values().any(|r| r.fwd_port() == Some(fwd.as_str())) {
                    return Err(SaiError::already_exists(format!("router interface on 0x{:016x}", port)));
                }
                let nid = sw.nid(&fwd)?;
                sw.add_entry(
                    INPUT_IFACE,
                    input_iface_entry(nid),
                    vec![
                        Action::set_u64(FieldNum::InputIface, oid.as_raw()),
                        Action::set_u64(FieldNum::PacketVrf, vr.as_raw()),
                    ],
                )?;
                sw.add_entry(
                    SRC_MAC,
                    src_mac_entry(oid),
                    vec![Action::set(FieldNum::EtherMacSrc, mac.octets().to_vec())],
                )?;
                self.admit(&mut state, mac)?;
                state.acquire(port);
                RifRecord {
                    vr,
                    kind,
                    port: Some((port, fwd)),
                    nid,
                    mac,
                }
            }
            _ => RifRecord {
                vr,
                kind,
                port: None,
                nid: 0,
                mac,
            },
        };
        state.acquire(vr.as_raw());
        state.rifs.insert(oid, record);
        let mut attrs = request.attributes();
        if let Some(port) = request.port_id {
            attrs.push((RouterInterfaceAttr::PortId.id(), AttrValue::Oid(port)));
        }
        sw.attributes().store(oid.as_raw(), attrs);
        info!(rif = %oid, vr = %vr, kind = ?kind, mac = %mac, "router interface created");
        Ok(oid)
    }

    pub fn remove_router_interface(&self, rif: RouterInterfaceOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .rifs
            .get(&rif)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("router interface {}", rif)))?;
        state.ensure_unused(rif.as_raw())?;
        if let Some((port, _)) = &record.port {
            sw.remove_entry(INPUT_IFACE, &input_iface_entry(record.nid))?;
            sw.remove_entry(SRC_MAC, &src_mac_entry(rif))?;
            self.unadmit(&mut state, record.mac)?;
            state.release(*port);
        }
        state.release(record.vr.as_raw());
        state.rifs.remove(&rif);
        sw.attributes().remove(rif.as_raw());
        info!(rif = %rif, "router interface removed");
        Ok(())
    }

    /// Changes the source MAC of a port interface.
    pub fn set_router_interface_src_mac(&self, rif: RouterInterfaceOid, mac: MacAddress) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .rifs
            .get(&rif)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("router interface {}", rif)))?;
        if record.port.is_some() && record.mac != mac {
            sw.add_entry(
                SRC_MAC,
                src_mac_entry(rif),
                vec![Action::set(FieldNum::EtherMacSrc, mac.octets().to_vec())],
            )?;
            self.admit(&mut state, mac)?;
            self.unadmit(&mut state, record.mac)?;
        }
        if let Some(r) = state.rifs.get_mut(&rif) {
            r.mac = mac;
        }
        sw.attributes()
            .set(rif.as_raw(), RouterInterfaceAttr::SrcMacAddress.id(), mac.into());
        Ok(())
    }

    pub fn get_router_interface_attributes(
        &self,
        rif: RouterInterfaceOid,
        attrs: &[RouterInterfaceAttr],
    ) -> SaiResult<Vec<(RouterInterfaceAttr, AttrValue)>> {
        self.switch.attributes().read(rif.as_raw(), attrs)
    }

    /// Admits frames whose destination MAC matches `mac_address` under
    /// `mac_address_mask` into L3 processing.
    pub fn create_my_mac(&self, request: &MyMacRequest) -> SaiResult<MyMacOid> {
        let sw = self.switch;
        let mac = request
            .mac_address
            .ok_or_else(|| SaiError::missing(MyMacAttr::MacAddress.name()))?;
        let mask = request.mac_address_mask.unwrap_or(MacAddress::EXACT_MASK);
        let priority = request.priority.unwrap_or(0);
        if priority >= RIF_ADMIT_PRIORITY {
            return Err(SaiError::invalid_parameter(format!("my-mac priority {} out of range", priority)));
        }
        let entry = EntryDesc::flow(
            0,
            priority,
            vec![EntryKey::masked(
                FieldNum::EtherMacDst,
                mac.octets().to_vec(),
                mask.octets().to_vec(),
            )],
        );
        let mut state = sw.lock();
        if state.my_macs.values().any(|m| m.entry == entry) {
            return Err(SaiError::already_exists(format!("my-mac {}/{}", mac, mask)));
        }
        sw.add_entry(L3_ADMIT, entry.clone(), vec![Action::Continue])?;
        let oid = sw.alloc();
        state.my_macs.insert(oid, MyMacRecord { entry });
        sw.attributes().store(oid.as_raw(), request.attributes());
        Ok(oid)
    }

    pub fn remove_my_mac(&self, my_mac: MyMacOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .my_macs
            .remove(&my_mac)
            .ok_or_else(|| SaiError::not_found(format!("my-mac {}", my_mac)))?;
        sw.remove_entry(L3_ADMIT, &record.entry)?;
        sw.attributes().remove(my_mac.as_raw());
        Ok(())
    }

    /// Router interfaces of a virtual router.
    pub fn router_interfaces(&self, vr: VirtualRouterOid) -> Vec<RouterInterfaceOid> {
        let mut rifs: Vec<RouterInterfaceOid> = self
            .switch
            .lock()
            .rifs
            .iter()
            .filter(|(_, r)| r.vr == vr)
            .map(|(oid, _)| *oid)
            .collect();
        rifs.sort();
        rifs
    }
}
