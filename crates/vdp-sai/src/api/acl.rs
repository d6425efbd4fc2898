//! ACL table groups, tables and entries.
//!
//! A table group owns one flow table, bound into the pipeline at its stage
//! (`acl-pre-ingress`, `acl-ingress` or `acl-egress`). Each group member
//! places an ACL table in one bank of that flow table; lower banks are
//! searched first and the first matching entry wins. Within a bank a
//! higher SAI priority matches first.

use crate::api::next_hop::{via_group, via_next_hop};
use crate::api::PacketAction;
use crate::attr::{AttrValue, AttributeRequest, SaiAttribute};
use crate::error::{SaiError, SaiResult};
use crate::pipeline::{ACL_EGRESS, ACL_INGRESS, ACL_PRE_INGRESS, CPU_PORT};
use crate::sai_attributes;
use crate::switch::{State, Switch};
use crate::types::{
    AclEntryOid, AclTableGroupMemberOid, AclTableGroupOid, AclTableOid, NextHopGroupOid, NextHopOid, ObjectType,
    PortOid, RawSaiObjectId,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info};
use vdp_fwd::{Action, EntryDesc, EntryKey, FieldId, FieldNum, TableDesc};
use vdp_types::bytes::{from_u64, prefix_mask};
use vdp_types::{IpPrefix, MacAddress};

/// Pipeline stage an ACL applies at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AclStage {
    /// Before router interface resolution.
    PreIngress,
    #[default]
    Ingress,
    Egress,
}

impl AclStage {
    fn table(&self) -> &'static str {
        match self {
            AclStage::PreIngress => ACL_PRE_INGRESS,
            AclStage::Ingress => ACL_INGRESS,
            AclStage::Egress => ACL_EGRESS,
        }
    }
}

impl fmt::Display for AclStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclStage::PreIngress => write!(f, "PRE_INGRESS"),
            AclStage::Ingress => write!(f, "INGRESS"),
            AclStage::Egress => write!(f, "EGRESS"),
        }
    }
}

impl From<AclStage> for AttrValue {
    fn from(v: AclStage) -> Self {
        AttrValue::I32(match v {
            AclStage::Ingress => 0,
            AclStage::Egress => 1,
            AclStage::PreIngress => 3,
        })
    }
}

/// Match fields of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AclField {
    SrcMac,
    DstMac,
    EtherType,
    SrcIp,
    DstIp,
    SrcIpv6,
    DstIpv6,
    /// Bits 127:96 of the IPv6 destination.
    DstIpv6Word3,
    IpProtocol,
    L4SrcPort,
    L4DstPort,
    Ttl,
    IcmpType,
    IcmpCode,
    Icmpv6Type,
    Icmpv6Code,
    TcpFlags,
    InPort,
    OuterVlanId,
}

impl AclField {
    fn field_num(&self) -> FieldNum {
        match self {
            AclField::SrcMac => FieldNum::EtherMacSrc,
            AclField::DstMac => FieldNum::EtherMacDst,
            AclField::EtherType => FieldNum::EtherType,
            AclField::SrcIp | AclField::SrcIpv6 => FieldNum::IpAddrSrc,
            AclField::DstIp | AclField::DstIpv6 | AclField::DstIpv6Word3 => FieldNum::IpAddrDst,
            AclField::IpProtocol => FieldNum::IpProto,
            AclField::L4SrcPort => FieldNum::L4PortSrc,
            AclField::L4DstPort => FieldNum::L4PortDst,
            AclField::Ttl => FieldNum::IpHop,
            AclField::IcmpType | AclField::Icmpv6Type => FieldNum::IcmpType,
            AclField::IcmpCode | AclField::Icmpv6Code => FieldNum::IcmpCode,
            AclField::TcpFlags => FieldNum::TcpFlags,
            AclField::InPort => FieldNum::PacketPortInput,
            AclField::OuterVlanId => FieldNum::VlanTag,
        }
    }

    /// IP version the field implies.
    fn ip_version(&self) -> Option<u8> {
        match self {
            AclField::SrcIp | AclField::DstIp | AclField::IcmpType | AclField::IcmpCode => Some(4),
            AclField::SrcIpv6
            | AclField::DstIpv6
            | AclField::DstIpv6Word3
            | AclField::Icmpv6Type
            | AclField::Icmpv6Code => Some(6),
            _ => None,
        }
    }
}

/// One match of an ACL entry. Without a mask every bit must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclMatch {
    pub field: AclField,
    pub data: Vec<u8>,
    pub mask: Option<Vec<u8>>,
}

impl AclMatch {
    pub fn new(field: AclField, data: impl Into<Vec<u8>>) -> Self {
        Self {
            field,
            data: data.into(),
            mask: None,
        }
    }

    pub fn masked(field: AclField, data: impl Into<Vec<u8>>, mask: impl Into<Vec<u8>>) -> Self {
        Self {
            field,
            data: data.into(),
            mask: Some(mask.into()),
        }
    }

    /// Matches an address prefix on an IP field.
    pub fn prefix(field: AclField, prefix: IpPrefix) -> Self {
        let data = prefix.address().octets();
        let mask = prefix_mask(data.len(), usize::from(prefix.prefix_len()));
        Self::masked(field, data, mask)
    }

    pub fn mac(field: AclField, mac: MacAddress) -> Self {
        Self::new(field, mac.octets().to_vec())
    }

    pub fn in_port(port: PortOid) -> Self {
        Self::new(AclField::InPort, port.to_bytes())
    }
}

/// An action of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    PacketAction(PacketAction),
    /// Sets PACKET_VRF, redirecting the FIB lookup.
    SetVrf(RawSaiObjectId),
    SetUserTrapId(u32),
    /// Port, LAG, next hop or next-hop group.
    Redirect(RawSaiObjectId),
}

impl AclAction {
    fn order(&self) -> u8 {
        match self {
            AclAction::SetVrf(_) => 0,
            AclAction::SetUserTrapId(_) => 1,
            AclAction::Redirect(_) => 2,
            AclAction::PacketAction(_) => 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AclTableGroupRequest {
    pub stage: Option<AclStage>,
}

sai_attributes! {
    pub enum AclTableGroupAttr: AclTableGroup for AclTableGroupRequest {
        Stage = 0, "SAI_ACL_TABLE_GROUP_ATTR_ACL_STAGE" => stage, default AclStage::Ingress;
        MemberList = 3, "SAI_ACL_TABLE_GROUP_ATTR_MEMBER_LIST";
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AclGroupRecord {
    pub stage: AclStage,
    /// Flow table id.
    pub table: String,
    /// Bank to member.
    pub banks: BTreeMap<usize, AclTableGroupMemberOid>,
}

#[derive(Debug, Clone, Default)]
pub struct AclTableGroupMemberRequest {
    pub acl_table_group_id: Option<AclTableGroupOid>,
    pub acl_table_id: Option<AclTableOid>,
    pub priority: Option<u32>,
}

sai_attributes! {
    pub enum AclTableGroupMemberAttr: AclTableGroupMember for AclTableGroupMemberRequest {
        AclTableGroupId = 0, "SAI_ACL_TABLE_GROUP_MEMBER_ATTR_ACL_TABLE_GROUP_ID" => acl_table_group_id;
        AclTableId = 1, "SAI_ACL_TABLE_GROUP_MEMBER_ATTR_ACL_TABLE_ID" => acl_table_id;
        Priority = 2, "SAI_ACL_TABLE_GROUP_MEMBER_ATTR_PRIORITY" => priority, default 0u32;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AclGroupMemberRecord {
    pub group: AclTableGroupOid,
    pub table: AclTableOid,
    pub bank: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AclTableRequest {
    pub stage: Option<AclStage>,
    pub size: Option<u32>,
    /// Fields entries may match on; any field when unset.
    pub fields: Option<Vec<AclField>>,
}

sai_attributes! {
    pub enum AclTableAttr: AclTable for AclTableRequest {
        Stage = 0, "SAI_ACL_TABLE_ATTR_ACL_STAGE" => stage, default AclStage::Ingress;
        Size = 2, "SAI_ACL_TABLE_ATTR_SIZE" => size, default 0u32;
        EntryList = 0x1000, "SAI_ACL_TABLE_ATTR_ENTRY_LIST";
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AclTableRecord {
    pub stage: AclStage,
    pub size: u32,
    pub fields: Option<BTreeSet<AclField>>,
    pub member: Option<AclTableGroupMemberOid>,
    pub entries: BTreeSet<AclEntryOid>,
}

#[derive(Debug, Clone, Default)]
pub struct AclEntryRequest {
    pub table_id: Option<AclTableOid>,
    pub priority: Option<u32>,
    pub admin_state: Option<bool>,
    pub fields: Vec<AclMatch>,
    pub actions: Vec<AclAction>,
}

sai_attributes! {
    pub enum AclEntryAttr: AclEntry for AclEntryRequest {
        TableId = 0, "SAI_ACL_ENTRY_ATTR_TABLE_ID" => table_id;
        Priority = 1, "SAI_ACL_ENTRY_ATTR_PRIORITY" => priority, default 0u32;
        AdminState = 2, "SAI_ACL_ENTRY_ATTR_ADMIN_STATE" => admin_state, default true;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AclEntryRecord {
    pub table: AclTableOid,
    pub entry: EntryDesc,
    pub group_table: String,
    /// Disabled entries stay programmed as a plain `Continue`.
    pub enabled: bool,
    /// Ports the matches name.
    pub match_refs: Vec<RawSaiObjectId>,
    /// Objects the actions name.
    pub action_refs: Vec<RawSaiObjectId>,
}

impl AclEntryRecord {
    fn refs(&self) -> impl Iterator<Item = RawSaiObjectId> + '_ {
        self.match_refs.iter().chain(&self.action_refs).copied()
    }
}

/// Flow keys of `matches`, plus the objects they reference.
fn entry_keys(state: &State, sw: &Switch, matches: &[AclMatch]) -> SaiResult<(Vec<EntryKey>, Vec<RawSaiObjectId>)> {
    let mut seen = HashSet::new();
    let mut version = None;
    let mut keys = Vec::new();
    let mut refs = Vec::new();
    for m in matches {
        if !seen.insert(m.field) {
            return Err(SaiError::invalid_parameter(format!("field {:?} given twice", m.field)));
        }
        if let Some(v) = m.field.ip_version() {
            if version.is_some_and(|other| other != v) {
                return Err(SaiError::invalid_parameter("entry mixes IPv4 and IPv6 fields"));
            }
            version = Some(v);
        }
        let num = m.field.field_num();
        let key = match m.field {
            AclField::InPort => {
                let raw = u64::from_be_bytes(
                    m.data
                        .as_slice()
                        .try_into()
                        .map_err(|_| SaiError::invalid_parameter("in-port match needs an 8-byte object id"))?,
                );
                let fwd = state.port_like(raw)?;
                refs.push(raw);
                EntryKey::new(num, from_u64(sw.nid(&fwd)?))
            }
            AclField::DstIpv6Word3 => {
                if m.data.len() != 4 {
                    return Err(SaiError::invalid_parameter("IPv6 word 3 is 4 bytes"));
                }
                let mut value = m.data.clone();
                value.resize(16, 0);
                let mut mask = m.mask.clone().unwrap_or_else(|| vec![0xff; 4]);
                mask.resize(16, 0);
                EntryKey::masked(num, value, mask)
            }
            AclField::OuterVlanId => {
                let vid = m.mask.as_deref().map_or(0x0fff, |mask| {
                    mask.iter().fold(0u16, |acc, b| (acc << 8) | u16::from(*b)) & 0x0fff
                });
                EntryKey::masked(num, m.data.clone(), vid.to_be_bytes().to_vec())
            }
            _ => match &m.mask {
                Some(mask) => EntryKey::masked(num, m.data.clone(), mask.clone()),
                None => EntryKey::new(num, m.data.clone()),
            },
        };
        keys.push(key);
    }
    if let Some(v) = version {
        keys.push(EntryKey::new(FieldNum::IpVersion, vec![v]));
    }
    Ok((keys, refs))
}

/// Flow actions of `actions`, plus the objects they reference.
fn entry_actions(state: &State, actions: &[AclAction]) -> SaiResult<(Vec<Action>, Vec<RawSaiObjectId>)> {
    let mut sorted = actions.to_vec();
    sorted.sort_by_key(AclAction::order);
    let mut out = Vec::new();
    let mut refs = Vec::new();
    for action in sorted {
        match action {
            AclAction::SetVrf(vr) => out.push(Action::set_u64(FieldNum::PacketVrf, vr)),
            AclAction::SetUserTrapId(id) => out.push(Action::set_u64(FieldNum::TrapId, u64::from(id))),
            AclAction::Redirect(raw) => {
                match ObjectType::of(raw) {
                    Some(ObjectType::Port | ObjectType::Lag) => {
                        out.push(Action::transmit_now(state.port_like(raw)?));
                    }
                    Some(ObjectType::NextHop) => {
                        let nh = NextHopOid::from_raw_unchecked(raw);
                        if !state.next_hops.contains_key(&nh) {
                            return Err(SaiError::not_found(format!("next hop {}", nh)));
                        }
                        out.extend(via_next_hop(nh));
                    }
                    Some(ObjectType::NextHopGroup) => {
                        let group = NextHopGroupOid::from_raw_unchecked(raw);
                        if !state.groups.contains_key(&group) {
                            return Err(SaiError::not_found(format!("next hop group {}", group)));
                        }
                        out.extend(via_group(group));
                    }
                    _ => {
                        return Err(SaiError::invalid_parameter(format!(
                            "cannot redirect to 0x{:016x}",
                            raw
                        )))
                    }
                }
                refs.push(raw);
            }
            AclAction::PacketAction(action) => match action {
                PacketAction::Drop | PacketAction::Deny => out.push(Action::Drop),
                PacketAction::Forward | PacketAction::Transit => out.push(Action::Continue),
                PacketAction::Trap => out.push(Action::transmit_now(CPU_PORT)),
                PacketAction::Copy | PacketAction::Log => out.push(Action::Mirror {
                    preserve: vec![FieldId::from(FieldNum::TrapId), FieldId::from(FieldNum::InputIface)],
                    port: CPU_PORT.to_string(),
                }),
            },
        }
    }
    Ok((out, refs))
}

/// ACL API.
pub struct AclApi<'a> {
    switch: &'a Switch,
}

impl<'a> AclApi<'a> {
    pub(crate) fn new(switch: &'a Switch) -> Self {
        Self { switch }
    }

    /// Creates a table group and binds it at its stage. One group per
    /// stage.
    pub fn create_table_group(&self, request: &AclTableGroupRequest) -> SaiResult<AclTableGroupOid> {
        let sw = self.switch;
        let stage = request.stage.unwrap_or_default();
        let mut state = sw.lock();
        if state.acl_groups.values().any(|g| g.stage == stage) {
            return Err(SaiError::already_exists(format!("ACL table group at stage {}", stage)));
        }
        let oid: AclTableGroupOid = sw.alloc();
        let table = format!("acl-group-{}", oid.seq());
        let engine = sw.engine();
        engine.table_create(
            sw.context(),
            TableDesc::flow(table.clone(), sw.config().acl.banks).with_default(vec![Action::Continue]),
        )?;
        if let Err(e) = engine.table_default_set(sw.context(), stage.table(), vec![Action::lookup(table.clone())]) {
            let _ = engine.object_delete(sw.context(), &table);
            return Err(e.into());
        }
        state.acl_groups.insert(
            oid,
            AclGroupRecord {
                stage,
                table: table.clone(),
                banks: BTreeMap::new(),
            },
        );
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(group = %oid, stage = %stage, table = %table, "ACL table group created");
        Ok(oid)
    }

    pub fn remove_table_group(&self, group: AclTableGroupOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .acl_groups
            .get(&group)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("ACL table group {}", group)))?;
        if !record.banks.is_empty() {
            return Err(SaiError::object_in_use(format!(
                "ACL table group {} has {} members",
                group,
                record.banks.len()
            )));
        }
        let engine = sw.engine();
        engine.table_default_set(sw.context(), record.stage.table(), Vec::new())?;
        engine.object_delete(sw.context(), &record.table)?;
        state.acl_groups.remove(&group);
        sw.attributes().remove(group.as_raw());
        info!(group = %group, "ACL table group removed");
        Ok(())
    }

    /// Reads group attributes; the member list is live.
    pub fn get_table_group_attributes(
        &self,
        group: AclTableGroupOid,
        attrs: &[AclTableGroupAttr],
    ) -> SaiResult<Vec<(AclTableGroupAttr, AttrValue)>> {
        let sw = self.switch;
        let members: Vec<AclTableGroupMemberOid> = sw
            .lock()
            .acl_groups
            .get(&group)
            .ok_or_else(|| SaiError::not_found(format!("ACL table group {}", group)))?
            .banks
            .values()
            .copied()
            .collect();
        let mut out = sw.attributes().read(group.as_raw(), attrs)?;
        if attrs.contains(&AclTableGroupAttr::MemberList) {
            out.push((AclTableGroupAttr::MemberList, members.into()));
        }
        Ok(out)
    }

    pub fn create_table(&self, request: &AclTableRequest) -> SaiResult<AclTableOid> {
        let sw = self.switch;
        let oid: AclTableOid = sw.alloc();
        sw.lock().acl_tables.insert(
            oid,
            AclTableRecord {
                stage: request.stage.unwrap_or_default(),
                size: request.size.unwrap_or(0),
                fields: request.fields.as_ref().map(|f| f.iter().copied().collect()),
                member: None,
                entries: BTreeSet::new(),
            },
        );
        sw.attributes().store(oid.as_raw(), request.attributes());
        debug!(table = %oid, "ACL table created");
        Ok(oid)
    }

    /// Removes a table. It must have no entries and belong to no group.
    pub fn remove_table(&self, table: AclTableOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .acl_tables
            .get(&table)
            .ok_or_else(|| SaiError::not_found(format!("ACL table {}", table)))?;
        if let Some(member) = record.member {
            return Err(SaiError::object_in_use(format!("ACL table {} is bound by {}", table, member)));
        }
        if !record.entries.is_empty() {
            return Err(SaiError::object_in_use(format!(
                "ACL table {} has {} entries",
                table,
                record.entries.len()
            )));
        }
        state.acl_tables.remove(&table);
        sw.attributes().remove(table.as_raw());
        Ok(())
    }

    /// Reads table attributes; the entry list is live.
    pub fn get_table_attributes(&self, table: AclTableOid, attrs: &[AclTableAttr]) -> SaiResult<Vec<(AclTableAttr, AttrValue)>> {
        let sw = self.switch;
        let entries: Vec<AclEntryOid> = sw
            .lock()
            .acl_tables
            .get(&table)
            .ok_or_else(|| SaiError::not_found(format!("ACL table {}", table)))?
            .entries
            .iter()
            .copied()
            .collect();
        let mut out = sw.attributes().read(table.as_raw(), attrs)?;
        if attrs.contains(&AclTableAttr::EntryList) {
            out.push((AclTableAttr::EntryList, entries.into()));
        }
        Ok(out)
    }

    /// Places a table in the first free bank of a group.
    ///
    /// # Errors
    ///
    /// The stages must agree; a table belongs to at most one group; a group
    /// with every bank taken reports `TableFull`.
    pub fn create_table_group_member(&self, request: &AclTableGroupMemberRequest) -> SaiResult<AclTableGroupMemberOid> {
        let sw = self.switch;
        let group = request
            .acl_table_group_id
            .ok_or_else(|| SaiError::missing(AclTableGroupMemberAttr::AclTableGroupId.name()))?;
        let table = request
            .acl_table_id
            .ok_or_else(|| SaiError::missing(AclTableGroupMemberAttr::AclTableId.name()))?;

        let mut state = sw.lock();
        let group_record = state
            .acl_groups
            .get(&group)
            .ok_or_else(|| SaiError::not_found(format!("ACL table group {}", group)))?;
        let table_record = state
            .acl_tables
            .get(&table)
            .ok_or_else(|| SaiError::not_found(format!("ACL table {}", table)))?;
        if let Some(member) = table_record.member {
            return Err(SaiError::already_exists(format!("ACL table {} is bound by {}", table, member)));
        }
        if table_record.stage != group_record.stage {
            return Err(SaiError::invalid_parameter(format!(
                "ACL table {} is {}, group {} is {}",
                table, table_record.stage, group, group_record.stage
            )));
        }
        let bank = (0..sw.config().acl.banks)
            .find(|b| !group_record.banks.contains_key(b))
            .ok_or_else(|| SaiError::TableFull {
                table: group_record.table.clone(),
            })?;

        let oid: AclTableGroupMemberOid = sw.alloc();
        if let Some(g) = state.acl_groups.get_mut(&group) {
            g.banks.insert(bank, oid);
        }
        if let Some(t) = state.acl_tables.get_mut(&table) {
            t.member = Some(oid);
        }
        state.acl_group_members.insert(oid, AclGroupMemberRecord { group, table, bank });
        sw.attributes().store(oid.as_raw(), request.attributes());
        info!(group = %group, table = %table, bank, "ACL table bound");
        Ok(oid)
    }

    /// Unbinds a table. Its entries must be removed first.
    pub fn remove_table_group_member(&self, member: AclTableGroupMemberOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .acl_group_members
            .get(&member)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("ACL table group member {}", member)))?;
        if state
            .acl_tables
            .get(&record.table)
            .is_some_and(|t| !t.entries.is_empty())
        {
            return Err(SaiError::object_in_use(format!("ACL table {} has entries", record.table)));
        }
        state.acl_group_members.remove(&member);
        if let Some(g) = state.acl_groups.get_mut(&record.group) {
            g.banks.remove(&record.bank);
        }
        if let Some(t) = state.acl_tables.get_mut(&record.table) {
            t.member = None;
        }
        sw.attributes().remove(member.as_raw());
        Ok(())
    }

    /// Creates an entry in a bound table.
    ///
    /// # Errors
    ///
    /// The priority must lie within the switch's ACL priority range, each
    /// field may appear once and IPv4 and IPv6 fields cannot be mixed.
    pub fn create_entry(&self, request: &AclEntryRequest) -> SaiResult<AclEntryOid> {
        let sw = self.switch;
        let table = request
            .table_id
            .ok_or_else(|| SaiError::missing(AclEntryAttr::TableId.name()))?;
        let limits = &sw.config().acl;
        let priority = request.priority.unwrap_or(limits.min_priority);
        if !(limits.min_priority..=limits.max_priority).contains(&priority) {
            return Err(SaiError::invalid_parameter(format!(
                "priority {} outside {}..={}",
                priority, limits.min_priority, limits.max_priority
            )));
        }

        let mut state = sw.lock();
        let table_record = state
            .acl_tables
            .get(&table)
            .ok_or_else(|| SaiError::not_found(format!("ACL table {}", table)))?;
        if let Some(allowed) = &table_record.fields {
            if let Some(m) = request.fields.iter().find(|m| !allowed.contains(&m.field)) {
                return Err(SaiError::invalid_parameter(format!(
                    "ACL table {} does not match on {:?}",
                    table, m.field
                )));
            }
        }
        if table_record.size > 0 && table_record.entries.len() >= table_record.size as usize {
            return Err(SaiError::TableFull {
                table: table.to_string(),
            });
        }
        let member = table_record
            .member
            .ok_or_else(|| SaiError::failed_precondition(format!("ACL table {} is not in a group", table)))?;
        let (group, bank) = state
            .acl_group_members
            .get(&member)
            .map(|m| (m.group, m.bank))
            .ok_or_else(|| SaiError::internal(format!("ACL table group member {} is gone", member)))?;
        let group_table = state
            .acl_groups
            .get(&group)
            .map(|g| g.table.clone())
            .ok_or_else(|| SaiError::internal(format!("ACL table group {} is gone", group)))?;

        let (keys, match_refs) = entry_keys(&state, sw, &request.fields)?;
        let (mut actions, action_refs) = entry_actions(&state, &request.actions)?;
        let enabled = request.admin_state != Some(false);
        if !enabled {
            actions = vec![Action::Continue];
        }
        let entry = EntryDesc::flow(bank, limits.max_priority - priority, keys);
        // The flow table would silently replace an identical entry.
        if state
            .acl_entries
            .values()
            .any(|r| r.group_table == group_table && r.entry == entry)
        {
            return Err(SaiError::already_exists(format!(
                "ACL entry with priority {} and the same fields in table {}",
                priority, table
            )));
        }
        sw.add_entry(&group_table, entry.clone(), actions)?;

        let oid: AclEntryOid = sw.alloc();
        let record = AclEntryRecord {
            table,
            entry,
            group_table,
            enabled,
            match_refs,
            action_refs,
        };
        for raw in record.refs() {
            state.acquire(raw);
        }
        if let Some(t) = state.acl_tables.get_mut(&table) {
            t.entries.insert(oid);
        }
        state.acl_entries.insert(oid, record);
        sw.attributes().store(oid.as_raw(), request.attributes());
        debug!(entry = %oid, table = %table, bank, priority, "ACL entry created");
        Ok(oid)
    }

    /// Replaces the actions of an entry. A disabled entry keeps forwarding
    /// as `Continue`; the new actions only take its references.
    pub fn set_entry_actions(&self, entry: AclEntryOid, actions: &[AclAction]) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .acl_entries
            .get(&entry)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("ACL entry {}", entry)))?;
        let (mut flow_actions, action_refs) = entry_actions(&state, actions)?;
        if !record.enabled {
            flow_actions = vec![Action::Continue];
        }
        sw.add_entry(&record.group_table, record.entry.clone(), flow_actions)?;

        for raw in &action_refs {
            state.acquire(*raw);
        }
        for raw in &record.action_refs {
            state.release(*raw);
        }
        if let Some(r) = state.acl_entries.get_mut(&entry) {
            r.action_refs = action_refs;
        }
        Ok(())
    }

    pub fn remove_entry(&self, entry: AclEntryOid) -> SaiResult<()> {
        let sw = self.switch;
        let mut state = sw.lock();
        let record = state
            .acl_entries
            .get(&entry)
            .cloned()
            .ok_or_else(|| SaiError::not_found(format!("ACL entry {}", entry)))?;
        sw.remove_entry(&record.group_table, &record.entry)?;
        state.acl_entries.remove(&entry);
        if let Some(t) = state.acl_tables.get_mut(&record.table) {
            t.entries.remove(&entry);
        }
        for raw in record.refs() {
            state.release(raw);
        }
        sw.attributes().remove(entry.as_raw());
        Ok(())
    }

    pub fn get_entry_attributes(&self, entry: AclEntryOid, attrs: &[AclEntryAttr]) -> SaiResult<Vec<(AclEntryAttr, AttrValue)>> {
        self.switch.attributes().read(entry.as_raw(), attrs)
    }
}
