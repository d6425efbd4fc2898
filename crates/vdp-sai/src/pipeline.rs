//! The fixed forwarding pipeline of a switch context.
//!
//! Front-panel ports run [`input_actions`] on ingress and [`output_actions`]
//! on egress. Everything the SAI objects program lands in one of the tables
//! named here.

use crate::error::SaiResult;
use vdp_fwd::{Action, Engine, EntryDesc, EntryKey, FieldId, FieldNum, TableDesc};

/// INPUT_PORT → INPUT_IFACE, PACKET_VRF.
pub const INPUT_IFACE: &str = "input-iface";
pub const ACL_PRE_INGRESS: &str = "acl-pre-ingress";
pub const ACL_INGRESS: &str = "acl-ingress";
pub const ACL_EGRESS: &str = "acl-egress";
/// Hostif traps keyed by ether type.
pub const PUNT_ETHER_TYPE: &str = "punt-ether-type";
/// Hostif traps keyed by IP protocol and ICMP type.
pub const PUNT_IP_PROTO: &str = "punt-ip-proto";
/// Router MACs; anything else is not routed.
pub const L3_ADMIT: &str = "l3-admit";
pub const FIB_SELECTOR: &str = "fib-selector";
pub const FIB_V4: &str = "fib-v4";
pub const FIB_V6: &str = "fib-v6";
/// Per next hop: output port, next-hop IP, encapsulation.
pub const NH_ACTIONS: &str = "nh-actions";
/// Per next-hop group: member selection.
pub const NHG: &str = "nhg";
/// (OUTPUT_IFACE, NEXT_HOP_IP) → destination MAC.
pub const NEIGHBOR: &str = "neighbor";
/// OUTPUT_IFACE → source MAC.
pub const SRC_MAC: &str = "src-mac";

/// Id of the switch's CPU port in the forwarding context.
pub const CPU_PORT: &str = "cpu";

/// Metadata that survives a reparse during encapsulation.
pub const PRESERVED: [FieldNum; 9] = [
    FieldNum::PacketPortInput,
    FieldNum::PacketPortOutput,
    FieldNum::PacketVrf,
    FieldNum::InputIface,
    FieldNum::OutputIface,
    FieldNum::NextHopIp,
    FieldNum::NextHopId,
    FieldNum::NextHopGroupId,
    FieldNum::TrapId,
];

/// Fields hashed by next-hop groups and LAGs.
pub const ECMP_FIELDS: [FieldNum; 5] = [
    FieldNum::IpAddrSrc,
    FieldNum::IpAddrDst,
    FieldNum::IpProto,
    FieldNum::L4PortSrc,
    FieldNum::L4PortDst,
];

fn fields(nums: &[FieldNum]) -> Vec<FieldId> {
    nums.iter().copied().map(FieldId::from).collect()
}

/// Ingress pipeline of every front-panel port and LAG.
pub fn input_actions() -> Vec<Action> {
    [
        INPUT_IFACE,
        ACL_PRE_INGRESS,
        ACL_INGRESS,
        PUNT_ETHER_TYPE,
        PUNT_IP_PROTO,
        L3_ADMIT,
        FIB_SELECTOR,
    ]
    .into_iter()
    .map(Action::lookup)
    .collect()
}

/// Egress pipeline of every front-panel port and LAG.
pub fn output_actions() -> Vec<Action> {
    vec![Action::lookup(ACL_EGRESS), Action::lookup(SRC_MAC)]
}

/// Creates the pipeline tables in `ctx`. Referenced tables are created
/// before the tables whose entries name them.
pub(crate) fn build(engine: &Engine, ctx: &str) -> SaiResult<()> {
    let tables = [
        TableDesc::exact(INPUT_IFACE, fields(&[FieldNum::PacketPortInput])),
        // ACL stages stay empty exact tables until a table group binds them.
        TableDesc::exact(ACL_PRE_INGRESS, Vec::new()),
        TableDesc::exact(ACL_INGRESS, Vec::new()),
        TableDesc::exact(ACL_EGRESS, Vec::new()),
        TableDesc::exact(PUNT_ETHER_TYPE, fields(&[FieldNum::EtherType])),
        TableDesc::flow(PUNT_IP_PROTO, 1),
        TableDesc::flow(L3_ADMIT, 1).with_default(vec![Action::Drop]),
        TableDesc::exact(SRC_MAC, fields(&[FieldNum::OutputIface])),
        TableDesc::exact(NEIGHBOR, fields(&[FieldNum::OutputIface, FieldNum::NextHopIp]))
            .with_default(vec![Action::Drop]),
        TableDesc::flow(NH_ACTIONS, 1).with_default(vec![Action::Drop]),
        TableDesc::exact(NHG, fields(&[FieldNum::NextHopGroupId])).with_default(vec![Action::Drop]),
        TableDesc::prefix(FIB_V4, fields(&[FieldNum::PacketVrf, FieldNum::IpAddrDst]))
            .with_default(vec![Action::Drop]),
        TableDesc::prefix(FIB_V6, fields(&[FieldNum::PacketVrf, FieldNum::IpAddrDst]))
            .with_default(vec![Action::Drop]),
        TableDesc::exact(FIB_SELECTOR, fields(&[FieldNum::IpVersion])).with_default(vec![Action::Drop]),
    ];
    for desc in tables {
        engine.table_create(ctx, desc)?;
    }
    engine.table_entry_add(
        ctx,
        FIB_SELECTOR,
        vec![
            (
                EntryDesc::new(vec![EntryKey::new(FieldNum::IpVersion, vec![4])]),
                vec![Action::lookup(FIB_V4)],
            ),
            (
                EntryDesc::new(vec![EntryKey::new(FieldNum::IpVersion, vec![6])]),
                vec![Action::lookup(FIB_V6)],
            ),
        ],
    )?;
    Ok(())
}
