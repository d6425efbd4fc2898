mod common;

use common::{ip6_frame, next_frame, udp4_frame, Fixture, RIF1_MAC, RIF2_MAC};
use pretty_assertions::assert_eq;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vdp_fwd::port::ChannelSink;
use vdp_fwd::{Direction, FieldId, FieldNum};
use vdp_sai::api::acl::{
    AclAction, AclEntryRequest, AclField, AclMatch, AclTableGroupMemberRequest, AclTableGroupRequest,
    AclTableRequest,
};
use vdp_sai::api::neighbor::{NeighborEntry, NeighborRequest};
use vdp_sai::api::next_hop::{EncapHeader, NextHopEncap, NextHopRequest};
use vdp_sai::api::port::{PortOperStatus, PortStat};
use vdp_sai::api::route::{RouteEntry, RouteRequest};
use vdp_sai::api::router::VirtualRouterRequest;
use vdp_sai::{PacketAction, PortOperEvent};
use vdp_types::MacAddress;

const NEIGHBOR_MAC: [u8; 6] = [0x10, 0x10, 0x10, 0x10, 0x10, 0x12];

fn bind_ingress_acl(fx: &Fixture, entry: AclEntryRequest) {
    let api = fx.switch.acl_api();
    let group = api.create_table_group(&AclTableGroupRequest::default()).unwrap();
    let table = api.create_table(&AclTableRequest::default()).unwrap();
    api.create_table_group_member(&AclTableGroupMemberRequest {
        acl_table_group_id: Some(group),
        acl_table_id: Some(table),
        ..Default::default()
    })
    .unwrap();
    api.create_entry(&AclEntryRequest {
        table_id: Some(table),
        ..entry
    })
    .unwrap();
}

#[tokio::test]
async fn route_through_mpls_in_udp_tunnel() {
    let fx = Fixture::new();
    let sw = &fx.switch;
    let nh = sw
        .next_hop_api()
        .create_next_hop(&NextHopRequest {
            ip: Some("2003::3".parse().unwrap()),
            router_interface_id: Some(fx.rif2),
            labelstack: Some(vec![100]),
            encap: Some(NextHopEncap::Headers(vec![
                EncapHeader::Ipv6 {
                    src: "2003::1".parse().unwrap(),
                    dst: "2003::2".parse().unwrap(),
                    hop_limit: 10,
                },
                EncapHeader::Udp {
                    src_port: 60000,
                    dst_port: 60001,
                },
            ])),
            ..Default::default()
        })
        .unwrap();
    sw.neighbor_api()
        .create_neighbor(
            &NeighborEntry::new(fx.rif2, "2003::3".parse().unwrap()),
            &NeighborRequest {
                dst_mac_address: Some(MacAddress::new(NEIGHBOR_MAC)),
                ..Default::default()
            },
        )
        .unwrap();
    let route = RouteEntry::new(sw.defaults().virtual_router, "2003::10/128".parse().unwrap()).unwrap();
    sw.route_api()
        .create_route(
            &route,
            &RouteRequest {
                next_hop_id: Some(nh.as_raw()),
                ..Default::default()
            },
        )
        .unwrap();

    let dst: Ipv6Addr = "2003::10".parse().unwrap();
    fx.peer("eth1").inject(ip6_frame(RIF1_MAC, dst, 64));
    let out = next_frame(&fx.peer("eth2")).await;

    assert_eq!(out[0..6], NEIGHBOR_MAC);
    assert_eq!(out[6..12], RIF2_MAC);
    assert_eq!(out[12..14], [0x86, 0xdd]);
    // Outer IPv6: UDP payload, hop limit decremented once.
    assert_eq!(out[20], 17);
    assert_eq!(out[21], 9);
    assert_eq!(out[22..38], "2003::1".parse::<Ipv6Addr>().unwrap().octets());
    assert_eq!(out[38..54], "2003::2".parse::<Ipv6Addr>().unwrap().octets());
    assert_eq!(out[54..58], [0xea, 0x60, 0xea, 0x61]);
    // Label 100, bottom of stack, TTL 64.
    assert_eq!(out[62..66], [0x00, 0x06, 0x41, 64]);
    assert_eq!(out[66] >> 4, 6);
    assert_eq!(out[90..106], dst.octets());
    assert!(out.ends_with(b"hello world"));

    fx.shutdown().await;
}

#[tokio::test]
async fn ingress_acl_drop_counts_discard() {
    let fx = Fixture::new();
    let sw = &fx.switch;
    let route = RouteEntry::new(sw.defaults().virtual_router, "2003::/64".parse().unwrap()).unwrap();
    sw.route_api()
        .create_route(
            &route,
            &RouteRequest {
                next_hop_id: Some(fx.rif2.as_raw()),
                ..Default::default()
            },
        )
        .unwrap();
    bind_ingress_acl(
        &fx,
        AclEntryRequest {
            priority: Some(10),
            fields: vec![AclMatch::prefix(AclField::DstIpv6, "2003::10/128".parse().unwrap())],
            actions: vec![AclAction::PacketAction(PacketAction::Drop)],
            ..Default::default()
        },
    );

    let frame = ip6_frame(RIF1_MAC, "2003::10".parse().unwrap(), 64);
    sw.engine()
        .packet_inject(sw.context(), "eth1", Direction::Ingress, &frame, &[])
        .unwrap();

    let stats = sw
        .port_api()
        .get_stats(fx.p1, &[PortStat::IfInDiscards, PortStat::InPkts])
        .unwrap();
    assert_eq!(stats, vec![(PortStat::IfInDiscards, 1), (PortStat::InPkts, 1)]);
    assert_eq!(fx.peer("eth2").try_recv(), None);

    fx.shutdown().await;
}

#[tokio::test]
async fn ingress_acl_drops_ipv4_prefix() {
    let fx = Fixture::new();
    let sw = &fx.switch;
    let route = RouteEntry::new(sw.defaults().virtual_router, "127.0.0.0/24".parse().unwrap()).unwrap();
    sw.route_api()
        .create_route(
            &route,
            &RouteRequest {
                next_hop_id: Some(fx.rif2.as_raw()),
                ..Default::default()
            },
        )
        .unwrap();
    bind_ingress_acl(
        &fx,
        AclEntryRequest {
            priority: Some(10),
            fields: vec![AclMatch::prefix(AclField::DstIp, "127.0.0.1/24".parse().unwrap())],
            actions: vec![AclAction::PacketAction(PacketAction::Drop)],
            ..Default::default()
        },
    );

    let frame = udp4_frame(RIF1_MAC, Ipv4Addr::new(127, 0, 0, 5));
    sw.engine()
        .packet_inject(sw.context(), "eth1", Direction::Ingress, &frame, &[])
        .unwrap();

    let stats = sw
        .port_api()
        .get_stats(fx.p1, &[PortStat::IfInDiscards, PortStat::InPkts])
        .unwrap();
    assert_eq!(stats, vec![(PortStat::IfInDiscards, 1), (PortStat::InPkts, 1)]);
    assert_eq!(fx.peer("eth2").try_recv(), None);

    fx.shutdown().await;
}

#[tokio::test]
async fn acl_set_vrf_steers_fib_lookup() {
    let fx = Fixture::new();
    let sw = &fx.switch;
    let vr2 = sw
        .router_api()
        .create_virtual_router(&VirtualRouterRequest::default())
        .unwrap();
    let prefix = "10.1.0.0/16";
    // The default router drops; only the steered lookup reaches the CPU.
    sw.route_api()
        .create_route(
            &RouteEntry::new(sw.defaults().virtual_router, prefix.parse().unwrap()).unwrap(),
            &RouteRequest {
                packet_action: Some(PacketAction::Drop),
                ..Default::default()
            },
        )
        .unwrap();
    sw.route_api()
        .create_route(
            &RouteEntry::new(vr2, prefix.parse().unwrap()).unwrap(),
            &RouteRequest {
                next_hop_id: Some(sw.defaults().cpu_port.as_raw()),
                ..Default::default()
            },
        )
        .unwrap();
    bind_ingress_acl(
        &fx,
        AclEntryRequest {
            priority: Some(1),
            fields: vec![AclMatch::prefix(AclField::DstIp, prefix.parse().unwrap())],
            actions: vec![AclAction::SetVrf(vr2.as_raw())],
            ..Default::default()
        },
    );

    let (sink, mut punts) = ChannelSink::new();
    sw.engine().packet_sink(sw.context(), Arc::new(sink)).unwrap();
    let dst = Ipv4Addr::new(10, 1, 2, 3);
    fx.peer("eth1").inject(udp4_frame(RIF1_MAC, dst));

    let punt = tokio::time::timeout(Duration::from_secs(5), punts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(punt.input_port, "eth1");
    assert_eq!(punt.frame[30..34], dst.octets());
    let iface = punt
        .fields
        .iter()
        .find(|(f, _)| *f == FieldId::from(FieldNum::InputIface))
        .map(|(_, v)| v.clone());
    assert_eq!(iface, Some(fx.rif1.to_bytes()));

    fx.shutdown().await;
}

#[tokio::test]
async fn admin_down_reports_one_oper_event() {
    let fx = Fixture::new();
    let cancel = CancellationToken::new();
    let mut events = fx.switch.subscribe_port_events(cancel.clone()).unwrap();

    fx.switch.port_api().set_admin_state(fx.p1, false).unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        PortOperEvent {
            port: fx.p1,
            status: PortOperStatus::Down,
        }
    );
    fx.switch.port_api().set_admin_state(fx.p1, false).unwrap();
    assert_eq!(events.try_next(), None);
    assert_eq!(fx.switch.port_api().get_oper_status(fx.p1).unwrap(), PortOperStatus::Down);

    cancel.cancel();
    assert_eq!(events.next().await, None);
    fx.shutdown().await;
}
