//! Next hops and next-hop groups.
//!
//! A next hop is an entry of the `nh-actions` flow table keyed by
//! NEXT_HOP_ID. Its actions pick the output port and interface, apply any
//! encapsulation, decrement the TTL and resolve the destination MAC in the
//! `neighbor` table. A next-hop group is an entry of the `nhg` table that
//! selects one member by hash, or floods to all of them.

use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::{ECMP_FIELDS, NEIGHBOR, NHG, NH_ACTIONS, PRESERVED};
use crate::sai_attributes;
use crate::switch::{State, Switch};
use crate::types::{NextHopGroupMemberOid, NextHopGroupOid, NextHopOid, RouterInterfaceOid};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, info};
use vdp_fwd::{Action, EntryDesc, EntryKey, FieldId, FieldNum, HashAlgorithm, HeaderId, Packet};
use vdp_types::IpAddress;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_MPLS: u16 = 0x8847;
const PROTO_IPV4: u8 = 4;
const PROTO_UDP: u8 = 17;
const PROTO_IPV6: u8 = 41;
const PROTO_MPLS: u8 = 137;
const DEFAULT_MPLS_TTL: u8 = 64;

/// Largest weight of an ECMP group member. Weights are expanded into
/// repeated action lists, so they are bounded.
pub const MAX_MEMBER_WEIGHT: u32 = 512;

/// One header of a next-hop encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncapHeader {
    Ipv4 { src: Ipv4Addr, dst: Ipv4Addr, ttl: u8 },
    Ipv6 { src: Ipv6Addr, dst: Ipv6Addr, hop_limit: u8 },
    Udp { src_port: u16, dst_port: u16 },
    Mpls { label: u32, ttl: u8 },
}

impl EncapHeader {
    fn id(&self) -> HeaderId {
        match self {
            EncapHeader::Ipv4 { .. } => HeaderId::Ipv4,
            EncapHeader::Ipv6 { .. } => HeaderId::Ipv6,
            EncapHeader::Udp { .. } => HeaderId::Udp,
            EncapHeader::Mpls { .. } => HeaderId::Mpls,
        }
    }

    /// Wire bytes; `next` is the header that follows, `None` for the inner
    /// packet.
    fn to_bytes(self, next: Option<HeaderId>) -> Vec<u8> {
        match self {
            EncapHeader::Ipv4 { src, dst, ttl } => {
                let mut h = HeaderId::Ipv4.template();
                h[8] = ttl;
                h[9] = next.map(ip_proto).unwrap_or(0);
                h[12..16].copy_from_slice(&src.octets());
                h[16..20].copy_from_slice(&dst.octets());
                h
            }
            EncapHeader::Ipv6 { src, dst, hop_limit } => {
                let mut h = HeaderId::Ipv6.template();
                h[6] = next.map(ip_proto).unwrap_or(0);
                h[7] = hop_limit;
                h[8..24].copy_from_slice(&src.octets());
                h[24..40].copy_from_slice(&dst.octets());
                h
            }
            EncapHeader::Udp { src_port, dst_port } => {
                let mut h = HeaderId::Udp.template();
                h[0..2].copy_from_slice(&src_port.to_be_bytes());
                h[2..4].copy_from_slice(&dst_port.to_be_bytes());
                h
            }
            EncapHeader::Mpls { label, ttl } => {
                let bottom = next != Some(HeaderId::Mpls);
                let word = ((label & 0xf_ffff) << 12) | (u32::from(bottom) << 8) | u32::from(ttl);
                word.to_be_bytes().to_vec()
            }
        }
    }
}

fn ip_proto(next: HeaderId) -> u8 {
    match next {
        HeaderId::Ipv4 => PROTO_IPV4,
        HeaderId::Ipv6 => PROTO_IPV6,
        HeaderId::Udp => PROTO_UDP,
        HeaderId::Mpls => PROTO_MPLS,
        _ => 0,
    }
}

fn ether_type(first: HeaderId) -> u16 {
    match first {
        HeaderId::Ipv4 => ETHERTYPE_IPV4,
        HeaderId::Ipv6 => ETHERTYPE_IPV6,
        _ => ETHERTYPE_MPLS,
    }
}

/// Encapsulation applied by a next hop, outermost header first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHopEncap {
    Headers(Vec<EncapHeader>),
    /// A serialized header stack starting with an Ethernet header.
    Raw { bytes: Vec<u8> },
}

/// Next hop types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NextHopType {
    #[default]
    Ip,
    Mpls,
}

impl From<NextHopType> for AttrValue {
    fn from(v: NextHopType) -> Self {
        AttrValue::I32(match v {
            NextHopType::Ip => 0,
            NextHopType::Mpls => 1,
        })
    }
}

/// Next hop creation request. IP and router interface are mandatory.
/// `labelstack` entries become MPLS headers inside any `encap` headers.
#[derive(Debug, Clone, Default)]
pub struct NextHopRequest {
    pub kind: Option<NextHopType>,
    pub ip: Option<IpAddress>,
    pub router_interface_id: Option<RouterInterfaceOid>,
    pub labelstack: Option<Vec<u32>>,
    pub encap: Option<NextHopEncap>,
}

sai_attributes! {
    pub enum NextHopAttr: NextHop for NextHopRequest {
        Type = 0, "SAI_NEXT_HOP_ATTR_TYPE" => kind, default NextHopType::Ip;
        Ip = 1, "SAI_NEXT_HOP_ATTR_IP" => ip;
        RouterInterfaceId = 2, "SAI_NEXT_HOP_ATTR_ROUTER_INTERFACE_ID" => router_interface_id;
        LabelStack = 5, "SAI_NEXT_HOP_ATTR_LABELSTACK" => labelstack;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NextHopRecord {
    pub rif: RouterInterfaceOid,
    pub entry: EntryDesc,
}

/// Next-hop group types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NextHopGroupType {
    /// One member per flow, chosen by hash.
    #[default]
    Ecmp,
    /// Every member gets a copy.
    Flood,
}

impl From<NextHopGroupType> for AttrValue {
    fn from(v: NextHopGroupType) -> Self {
        AttrValue::I32(match v {
            NextHopGroupType::Ecmp => 0,
            NextHopGroupType::Flood => 5,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NextHopGroupRequest {
    pub kind: Option<NextHopGroupType>,
}

sai_attributes! {
    pub enum NextHopGroupAttr: NextHopGroup for NextHopGroupRequest {
        NextHopCount = 0, "SAI_NEXT_HOP_GROUP_ATTR_NEXT_HOP_COUNT";
        NextHopMemberList = 1, "SAI_NEXT_HOP_GROUP_ATTR_NEXT_HOP_MEMBER_LIST";
        Type = 2, "SAI_NEXT_HOP_GROUP_ATTR_TYPE" => kind, default NextHopGroupType::Ecmp;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GroupRecord {
    pub kind: NextHopGroupType,
    /// Members with their next hop and weight.
    pub members: BTreeMap<NextHopGroupMemberOid, (NextHopOid, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct NextHopGroupMemberRequest {
    pub next_hop_group_id: Option<NextHopGroupOid>,
    pub next_hop_id: Option<NextHopOid>,
    pub weight: Option<u32>,
}

sai_attributes! {
    pub enum NextHopGroupMemberAttr: NextHopGroupMember for NextHopGroupMemberRequest {
        NextHopGroupId = 0, "SAI_NEXT_HOP_GROUP_MEMBER_ATTR_NEXT_HOP_GROUP_ID" => next_hop_group_id;
        NextHopId = 1, "SAI_NEXT_HOP_GROUP_MEMBER_ATTR_NEXT_HOP_ID" => next_hop_id;
        Weight = 2, "SAI_NEXT_HOP_GROUP_MEMBER_ATTR_WEIGHT" => weight, default 1u32;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GroupMemberRecord {
    pub group: NextHopGroupOid,
    pub next_hop: NextHopOid,
}

fn next_hop_entry(nh: NextHopOid) -> EntryDesc {
    EntryDesc::flow(0, 0, vec![EntryKey::new(FieldNum::NextHopId, nh.to_bytes())])
}

fn group_entry(group: NextHopGroupOid) -> EntryDesc {
    EntryDesc::new(vec![EntryKey::new(FieldNum::NextHopGroupId, group.to_bytes())])
}

/// Actions that take a packet through next hop `nh`.
pub(crate) fn via_next_hop(nh: NextHopOid) -> Vec<Action> {
    vec![Action::set_u64(FieldNum::NextHopId, nh.as_raw()), Action::lookup(NH_ACTIONS)]
}

/// Actions that take a packet through group `group`.
pub(crate) fn via_group(group: NextHopGroupOid) -> Vec<Action> {
    vec![
        Action::set_u64(FieldNum::NextHopGroupId, group.as_raw()),
        Action::lookup(NHG),
    ]
}

/// A weight of 0 counts as 1.
fn check_weight(weight: u32) -> SaiResult<u32> {
    if weight > MAX_MEMBER_WEIGHT {
        return Err(SaiError::invalid_parameter(format!(
            "weight {} above {}",
            weight, MAX_MEMBER_WEIGHT
        )));
    }
    Ok(weight.max(1))
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Weights divided by their greatest common divisor, so that `[4, 4]`
/// needs two action lists rather than eight.
fn reduced_weights(weights: &[u32]) -> Vec<u32> {
    let d = weights.iter().copied().fold(0, gcd).max(1);
    weights.iter().map(|w| w / d).collect()
}

/// Actions that rewrite the packet for `encap`.
fn encap_actions(headers: &[EncapHeader], raw: Option<&[u8]>) -> SaiResult<Vec<Action>> {
    let preserve: Vec<FieldId> = PRESERVED.iter().copied().map(FieldId::from).collect();
    if let Some(bytes) = raw {
        Packet::parse(HeaderId::Ethernet, bytes)
            .map_err(|e| SaiError::invalid_parameter(format!("raw encap does not parse: {}", e)))?;
        return Ok(vec![
            Action::Decap {
                header: HeaderId::Ethernet,
            },
            Action::Reparse {
                start: HeaderId::Ethernet,
                preserve,
                prepend: bytes.to_vec(),
            },
        ]);
    }
    let Some(first) = headers.first() else {
        return Ok(Vec::new());
    };
    if !HeaderId::Ethernet.is_parent_of(first.id()) {
        return Err(SaiError::invalid_parameter(format!("{} cannot follow Ethernet", first.id())));
    }
    for pair in headers.windows(2) {
        if !pair[0].id().is_parent_of(pair[1].id()) {
            return Err(SaiError::invalid_parameter(format!(
                "{} cannot carry {}",
                pair[0].id(),
                pair[1].id()
            )));
        }
    }

    let bytes_of = |i: usize| headers[i].to_bytes(headers.get(i + 1).map(EncapHeader::id));
    let mut actions = vec![Action::Decap {
        header: HeaderId::Ethernet,
    }];
    if headers.last().map(EncapHeader::id) == Some(HeaderId::Udp) {
        // UDP carries the inner packet without a parser-visible type, so the
        // stack is prepended as bytes and re-parsed.
        let mut prepend = HeaderId::Ethernet.template();
        prepend[12..14].copy_from_slice(&ether_type(first.id()).to_be_bytes());
        for i in 0..headers.len() {
            prepend.extend(bytes_of(i));
        }
        actions.push(Action::Reparse {
            start: HeaderId::Ethernet,
            preserve,
            prepend,
        });
    } else {
        for i in (0..headers.len()).rev() {
            actions.push(Action::Encap {
                header: headers[i].id(),
                data: bytes_of(i),
            });
        }
        actions.push(Action::Encap {
            header: HeaderId::Ethernet,
            data: Vec::new(),
        });
    }
    Ok(actions)
}

/// Next hop API.
pub struct NextHopApi<'a> {
    switch: &'a Switch,
}

impl<'a> NextHopApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    /// Creates a next hop.
    ///
    /// # Errors
    ///
    /// The router interface must exist and be bound to a port; encap
    /// headers must nest (an IP header can carry UDP, UDP can carry MPLS).
    pub fn create_next_hop(&self, request: &NextHopRequest) -> SaiResult<NextHopOid> {
        let sw = self.switch;
        let ip = request.ip.ok_or_else(|| SaiError::missing(NextHopAttr::Ip.name()))?;
        let rif = request
            .router_interface_id
            .ok_or_else(|| SaiError::missing(NextHopAttr::RouterInterfaceId.name()))?;
        let labels = request.labelstack.clone().unwrap_or_default();
        if request.kind == Some(NextHopType::Mpls) && labels.is_empty() {
            return Err(SaiError::missing(NextHopAttr::LabelStack.name()));
        }

        let mut headers = Vec::new();
        let mut raw = None;
        match &request.encap {
            Some(NextHopEncap::Headers(h)) => headers.extend_from_slice(h),
            Some(NextHopEncap::Raw { bytes }) => {
                if !labels.is_empty() {
                    return Err(SaiError::invalid_parameter("raw encap cannot carry a label stack"));
                }
                raw = Some(bytes.as_slice());
            }
            None => {}
        }
        headers.extend(labels.iter().map(|label| EncapHeader::Mpls {
            label: *label,
            ttl: DEFAULT_MPLS_TTL,
        }));
        let encap = encap_actions(&headers, raw)?;

        let mut state = sw.lock();
        let port = state
            .rifs
            .get(&rif)
            .ok_or_else(|| SaiError::not_found(format!("router interface {}", rif)))?
            .fwd_port()
            .map(str::to_string)
            .ok_or_else(|| SaiError::invalid_parameter(format!("router interface {} has no port", rif)))?;

        let mut actions = vec![
            Action::transmit(port),
            Action::set_u64(FieldNum::OutputIface, rif.as_raw()),
            Action::set(FieldNum::NextHopIp, ip.octets()),
        ];
        actions.extend(encap);
        actions.push(Action::dec(FieldNum::IpHop, 1));
        actions.push(Action::lookup(NEIGHBOR));

        let oid: NextHopOid = sw.alloc();
        let entry = next_hop_entry(oid);
        sw.add_entry(NH_ACTIONS, entry.clone(), actions)?;
        state.acquire(rif.as_raw());
        state.next_hops.insert(oid, NextHopRecord { rif, entry });
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(next_hop = %oid, ip = %ip, rif = %rif, encap = headers.len(), "next hop created");
        Ok(oid)
    }

    pub fn remove_next_hop(&self, nh: NextHopOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .next_hops
            .get(&nh)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("next hop {}", nh)))?;
        state.ensure_unused(nh.as_raw())?;
        sw.remove_entry(NH_ACTIONS, &record.entry)?;
        state.next_hops.remove(&nh);
        state.release(record.rif.as_raw());
        sw.attributes().remove(nh.as_raw());
        info!(next_hop = %nh, "next hop removed");
        Ok(())
    }

    pub fn get_next_hop_attributes(&self, nh: NextHopOid, attrs: &[NextHopAttr]) -> SaiResult<Vec<(NextHopAttr, AttrValue)>> {
        self.switch.attributes().read(nh.as_raw(), attrs)
    }

    /// Rewrites the `nhg` entry of `group` from its members.
    fn program_group(&self, state: &State, group: NextHopGroupOid) -> SaiResult<()> {
        let record = state
            .groups
            .get(&group)
            .ok_or_else(|| SaiError::not_found(format!("next hop group {}", group)))?;
        let actions = if record.members.is_empty() {
            vec![Action::Drop]
        } else {
            match record.kind {
                NextHopGroupType::Ecmp => {
                    let weights: Vec<u32> = record.members.values().map(|(_, w)| (*w).max(1)).collect();
                    let mut lists = Vec::new();
                    for ((nh, _), copies) in record.members.values().zip(reduced_weights(&weights)) {
                        for _ in 0..copies {
                            lists.push(via_next_hop(*nh));
                        }
                    }
                    vec![Action::SelectActionList {
                        algorithm: HashAlgorithm::Crc32,
                        fields: ECMP_FIELDS.iter().copied().map(FieldId::from).collect(),
                        lists,
                    }]
                }
                NextHopGroupType::Flood => vec![Action::FloodActionList {
                    lists: record.members.values().map(|(nh, _)| via_next_hop(*nh)).collect(),
                }],
            }
        };
        self.switch.add_entry(NHG, group_entry(group), actions)?;
        debug!(group = %group, members = record.members.len(), "next hop group programmed");
        Ok(())
    }

    pub fn create_next_hop_group(&self, request: &NextHopGroupRequest) -> SaiResult<NextHopGroupOid> {
        let sw = self.switch;
        let mut state = sw.lock();
        let oid: NextHopGroupOid = sw.alloc();
        state.groups.insert(
            oid,
            GroupRecord {
                kind: request.kind.unwrap_or_default(),
                members: BTreeMap::new(),
            },
        );
        if let Err(e) = self.program_group(&state, oid) {
            state.groups.remove(&oid);
            return Err(e);
        }
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(group = %oid, "next hop group created");
        Ok(oid)
    }

    /// Removes a group. Members must be removed first.
    pub fn remove_next_hop_group(&self, group: NextHopGroupOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .groups
            .get(&group)
            .ok_or_else(|| SaiError::not_found(format!("next hop group {}", group)))?;
        if !record.members.is_empty() {
            return Err(SaiError::object_in_use(format!(
                "next hop group {} has {} members",
                group,
                record.members.len()
            )));
        }
        state.ensure_unused(group.as_raw())?;
        sw.remove_entry(NHG, &group_entry(group))?;
        state.groups.remove(&group);
        sw.attributes().remove(group.as_raw());
        Ok(())
    }

    /// Reads group attributes; the member count and list are live.
    pub fn get_next_hop_group_attributes(
        &self,
        group: NextHopGroupOid,
        attrs: &[NextHopGroupAttr],
    ) -> SaiResult<Vec<(NextHopGroupAttr, AttrValue)>> {
        let sw = self.switch;
        let members: Vec<NextHopGroupMemberOid> = sw
            .lock()
            .groups
            .get(&group)
            .ok_or_else(|| SaiError::not_found(format!("next hop group {}", group)))?
            .members
            .keys()
            .copied()
            .collect();
        let mut out = sw.attributes().read(group.as_raw(), attrs)?;
        for attr in attrs {
            match attr {
                NextHopGroupAttr::NextHopCount => out.push((*attr, AttrValue::U32(members.len() as u32))),
                NextHopGroupAttr::NextHopMemberList => out.push((*attr, members.clone().into())),
                NextHopGroupAttr::Type => {}
            }
        }
        Ok(out)
    }

    pub fn create_next_hop_group_member(&self, request: &NextHopGroupMemberRequest) -> SaiResult<NextHopGroupMemberOid> {
        let sw = self.switch;
        let group = request
            .next_hop_group_id
            .ok_or_else(|| SaiError::missing(NextHopGroupMemberAttr::NextHopGroupId.name()))?;
        let nh = request
            .next_hop_id
            .ok_or_else(|| SaiError::missing(NextHopGroupMemberAttr::NextHopId.name()))?;
        let weight = check_weight(request.weight.unwrap_or(1))?;

        let mut state = sw.lock();
        if !state.next_hops.contains_key(&nh) {
            return Err(SaiError::not_found(format!("next hop {}", nh)));
        }
        let oid: NextHopGroupMemberOid = sw.alloc();
        state
            .groups
            .get_mut(&group)
            .ok_or_else(|| SaiError::not_found(format!("next hop group {}", group)))?
            .members
            .insert(oid, (nh, weight));
        if let Err(e) = self.program_group(&state, group) {
            if let Some(g) = state.groups.get_mut(&group) {
                g.members.remove(&oid);
            }
            return Err(e);
        }
        state.acquire(nh.as_raw());
        state.group_members.insert(oid, GroupMemberRecord { group, next_hop: nh });
        sw.attributes().store(oid.as_raw(), request.attributes());
        Ok(oid)
    }

    pub fn remove_next_hop_group_member(&self, member: NextHopGroupMemberOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .group_members
            .remove(&member)
            .ok_or_else(|| SaiError::not_found(format!("next hop group member {}", member)))?;
        if let Some(g) = state.groups.get_mut(&record.group) {
            g.members.remove(&member);
        }
        state.release(record.next_hop.as_raw());
        sw.attributes().remove(member.as_raw());
        self.program_group(&state, record.group)
    }

    /// Changes a member's weight, at most [`MAX_MEMBER_WEIGHT`].
    pub fn set_member_weight(&self, member: NextHopGroupMemberOid, weight: u32) -> SaiResult<()> {
        let sw = self.switch;
        check_weight(weight)?;
        let mut state = sw.lock();
        let group = state
            .group_members
            .get(&member)
            .map(|m| m.group)
            .ok_or_else(|| SaiError::not_found(format!("next hop group member {}", member)))?;
        if let Some(slot) = state.groups.get_mut(&group).and_then(|g| g.members.get_mut(&member)) {
            slot.1 = weight;
        }
        sw.attributes()
            .set(member.as_raw(), NextHopGroupMemberAttr::Weight.id(), weight.into());
        self.program_group(&state, group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::port::{PortRequest, PortSpeed};
    use crate::api::router::RouterInterfaceRequest;
    use crate::switch::SwitchConfig;
    use crate::SaiStatus;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use vdp_fwd::{Engine, InfoRequest, LoopbackLinks};

    #[test]
    fn test_mpls_bottom_of_stack() {
        let outer = EncapHeader::Mpls { label: 100, ttl: 64 };
        assert_eq!(outer.to_bytes(Some(HeaderId::Mpls)), vec![0x00, 0x06, 0x40, 64]);
        assert_eq!(outer.to_bytes(None), vec![0x00, 0x06, 0x41, 64]);
    }

    #[test]
    fn test_encap_chain_is_pushed_inside_out() {
        let headers = [
            EncapHeader::Ipv4 {
                src: Ipv4Addr::new(1, 1, 1, 1),
                dst: Ipv4Addr::new(2, 2, 2, 2),
                ttl: 8,
            },
            EncapHeader::Mpls { label: 7, ttl: 64 },
        ];
        let actions = encap_actions(&headers, None).unwrap();
        let pushed: Vec<HeaderId> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Encap { header, .. } => Some(*header),
                _ => None,
            })
            .collect();
        assert_eq!(pushed, vec![HeaderId::Mpls, HeaderId::Ipv4, HeaderId::Ethernet]);
        assert!(matches!(actions[0], Action::Decap { header: HeaderId::Ethernet }));
    }

    #[test]
    fn test_trailing_udp_reparses() {
        let headers = [
            EncapHeader::Ipv6 {
                src: "2003::1".parse().unwrap(),
                dst: "2003::2".parse().unwrap(),
                hop_limit: 10,
            },
            EncapHeader::Udp {
                src_port: 60000,
                dst_port: 60001,
            },
        ];
        let actions = encap_actions(&headers, None).unwrap();
        let Action::Reparse { prepend, .. } = &actions[1] else {
            panic!("expected a reparse, got {}", actions[1]);
        };
        assert_eq!(prepend.len(), 14 + 40 + 8);
        assert_eq!(&prepend[12..14], &[0x86, 0xdd]);
        assert_eq!(prepend[14 + 6], PROTO_UDP);
    }

    #[test]
    fn test_bad_nesting_is_rejected() {
        let headers = [
            EncapHeader::Udp {
                src_port: 1,
                dst_port: 2,
            },
            EncapHeader::Mpls { label: 7, ttl: 64 },
        ];
        assert!(encap_actions(&headers, None).is_err());
        assert!(encap_actions(&[], Some(&[0u8; 4])).is_err());
    }

    #[test]
    fn test_weights_are_reduced() {
        assert_eq!(reduced_weights(&[4, 4]), vec![1, 1]);
        assert_eq!(reduced_weights(&[512, 256, 128]), vec![4, 2, 1]);
        assert_eq!(reduced_weights(&[3, 2]), vec![3, 2]);
        assert_eq!(reduced_weights(&[]), Vec::<u32>::new());
    }

    #[tokio::test]
    async fn test_member_weight_is_bounded() {
        let engine = Arc::new(Engine::new(Arc::new(LoopbackLinks::new())));
        let sw = Switch::create(engine, SwitchConfig::default()).unwrap();
        let port = sw
            .port_api()
            .create_port(&PortRequest {
                hw_lanes: Some(vec![1]),
                speed: Some(PortSpeed::GE_10),
                ..Default::default()
            })
            .unwrap();
        let rif = sw
            .router_api()
            .create_router_interface(&RouterInterfaceRequest {
                virtual_router_id: Some(sw.defaults().virtual_router),
                port_id: Some(port.as_raw()),
                ..Default::default()
            })
            .unwrap();
        let api = sw.next_hop_api();
        let nh = api
            .create_next_hop(&NextHopRequest {
                ip: Some("10.0.0.2".parse().unwrap()),
                router_interface_id: Some(rif),
                ..Default::default()
            })
            .unwrap();
        let group = api.create_next_hop_group(&NextHopGroupRequest::default()).unwrap();
        let member = |weight| NextHopGroupMemberRequest {
            next_hop_group_id: Some(group),
            next_hop_id: Some(nh),
            weight: Some(weight),
        };

        let err = api
            .create_next_hop_group_member(&member(MAX_MEMBER_WEIGHT + 1))
            .unwrap_err();
        assert_eq!(err.status(), SaiStatus::InvalidParameter);
        let m = api.create_next_hop_group_member(&member(MAX_MEMBER_WEIGHT)).unwrap();

        let nhg = sw
            .engine()
            .info(sw.context(), InfoRequest::Get { id: NHG.to_string() })
            .unwrap()
            .lines;
        assert!(nhg[1].ends_with("SelectActionList(crc32, 1 lists)"), "{}", nhg[1]);

        assert!(api.set_member_weight(m, u32::MAX).is_err());
        api.set_member_weight(m, 4).unwrap();

        api.remove_next_hop_group_member(m).unwrap();
        api.remove_next_hop_group(group).unwrap();
        api.remove_next_hop(nh).unwrap();
        sw.router_api().remove_router_interface(rif).unwrap();
        sw.port_api().remove_port(port).unwrap();
        sw.shutdown().unwrap();
    }
}
