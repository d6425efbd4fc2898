//! Property checks that must hold across the packet model, the tables and
//! the ports.

mod common;

use common::{udp4_frame, Fixture, CTX};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;
use vdp_fwd::{
    Action, AggregateConfig, AggregateMember, CounterId, Direction, EntryDesc, EntryKey, FieldId, FieldNum,
    FwdError, HashAlgorithm, HeaderId, Object, Packet, PortConfig, PortDesc, TableDesc, UpdateOp,
    UpdateValue,
};
use vdp_types::bytes::pad_left;

fn vrf_of(fx: &Fixture, table: &str, frame: &[u8]) -> u64 {
    let table = fx.engine.context(CTX).unwrap().table(table).unwrap();
    let mut pkt = Packet::parse(HeaderId::Ethernet, frame).unwrap();
    let (actions, _) = table.process(&mut pkt);
    match actions.first() {
        Some(Action::Update { value, .. }) => match value {
            UpdateValue::Bytes(b) => b.iter().fold(0u64, |acc, b| acc << 8 | u64::from(*b)),
            UpdateValue::Field(_) => 0,
        },
        _ => 0,
    }
}

#[test]
fn field_set_then_read_is_left_padded() {
    let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 17);
    let mut pkt = Packet::parse(HeaderId::Ethernet, &frame).unwrap();

    let metadata = FieldNum::ALL
        .iter()
        .filter(|n| n.is_metadata() && **n != FieldNum::PacketLength);
    for num in metadata {
        let field = FieldId::new(*num);
        for len in 1..=num.size() {
            let value: Vec<u8> = (1..=len as u8).collect();
            pkt.update(&field, UpdateOp::Set, &value).unwrap();
            assert_eq!(pkt.field(&field).unwrap(), pad_left(&value, num.size()), "{}", field);
        }
    }

    // Header fields, within the width the header carries.
    let cases: [(FieldNum, &[u8]); 5] = [
        (FieldNum::EtherMacDst, &[0x02, 0, 0, 0, 0, 0x09]),
        (FieldNum::IpAddrDst, &[10, 1, 2, 3]),
        (FieldNum::IpHop, &[7]),
        (FieldNum::L4PortSrc, &[1]),
        (FieldNum::L4PortDst, &[0x12, 0x34]),
    ];
    for (num, value) in cases {
        let field = FieldId::new(num);
        pkt.update(&field, UpdateOp::Set, value).unwrap();
        assert_eq!(pkt.field(&field).unwrap(), pad_left(value, num.size()), "{}", field);
    }
}

#[test]
fn encap_then_decap_restores_frame() {
    let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 17);
    let mut pkt = Packet::parse(HeaderId::Ethernet, &frame).unwrap();
    pkt.decap(HeaderId::Ethernet).unwrap();
    let before = pkt.frame();
    let dst_before = pkt.field(&FieldNum::IpAddrDst.into()).unwrap();

    for outer in [HeaderId::Ipv6, HeaderId::Ipv4, HeaderId::Ethernet] {
        pkt.encap(outer, &[]).unwrap();
        assert!(pkt.frame().len() > before.len());
        pkt.decap(outer).unwrap();
        assert_eq!(pkt.frame(), before, "{}", outer);
        assert_eq!(pkt.field(&FieldNum::IpAddrDst.into()).unwrap(), dst_before);
    }
}

#[test]
fn reparse_keeps_listed_metadata_only() {
    let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 17);
    let mut pkt = Packet::parse(HeaderId::Ethernet, &frame).unwrap();
    pkt.decap(HeaderId::Ethernet).unwrap();
    let inner = pkt.frame();
    pkt.set_metadata_u64(FieldNum::PacketVrf, 5);
    pkt.set_metadata_u64(FieldNum::NextHopId, 9);

    let prepend = frame[..14].to_vec();
    pkt.reparse(HeaderId::Ethernet, &[FieldNum::PacketVrf.into()], &prepend)
        .unwrap();

    let mut expected = prepend;
    expected.extend_from_slice(&inner);
    assert_eq!(pkt.frame(), expected);
    assert_eq!(pkt.header_ids(), vec![HeaderId::Ethernet, HeaderId::Ipv4, HeaderId::Udp]);
    assert_eq!(pkt.metadata_u64(FieldNum::PacketVrf), 5);
    assert_eq!(pkt.metadata_u64(FieldNum::NextHopId), 0);
}

#[tokio::test]
async fn lower_priority_value_wins_within_bank() {
    let fx = Fixture::new();
    fx.engine.table_create(CTX, TableDesc::flow("acl", 1)).unwrap();
    let key = || vec![EntryKey::new(FieldNum::IpProto, vec![1])];
    let any = || vec![EntryKey::masked(FieldNum::IpProto, vec![0], vec![0])];
    fx.engine
        .table_entry_add(
            CTX,
            "acl",
            vec![
                (EntryDesc::flow(0, 10, key()), vec![Action::set_u64(FieldNum::PacketVrf, 10)]),
                (EntryDesc::flow(0, 5, any()), vec![Action::set_u64(FieldNum::PacketVrf, 5)]),
                (EntryDesc::flow(0, 5, key()), vec![Action::set_u64(FieldNum::PacketVrf, 6)]),
            ],
        )
        .unwrap();

    let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 1);
    // First match within level 5 is the wildcard entry.
    assert_eq!(vrf_of(&fx, "acl", &frame), 5);
    fx.engine
        .table_entry_remove(CTX, "acl", &[EntryDesc::flow(0, 5, any())])
        .unwrap();
    assert_eq!(vrf_of(&fx, "acl", &frame), 6);
    fx.engine
        .table_entry_remove(CTX, "acl", &[EntryDesc::flow(0, 5, key())])
        .unwrap();
    assert_eq!(vrf_of(&fx, "acl", &frame), 10);
    fx.shutdown().await;
}

#[tokio::test]
async fn longer_mask_wins_in_prefix_table() {
    let fx = Fixture::new();
    fx.engine
        .table_create(
            CTX,
            TableDesc::prefix("fib", vec![FieldNum::IpAddrDst.into()]).with_default(vec![Action::Drop]),
        )
        .unwrap();
    let route = |len: usize, vrf: u64| {
        (
            EntryDesc::new(vec![EntryKey::prefix(FieldNum::IpAddrDst, vec![10, 1, 2, 0], len)]),
            vec![Action::set_u64(FieldNum::PacketVrf, vrf)],
        )
    };
    fx.engine
        .table_entry_add(CTX, "fib", vec![route(8, 8), route(24, 24), route(16, 16)])
        .unwrap();

    assert_eq!(vrf_of(&fx, "fib", &udp4_frame(Ipv4Addr::new(10, 1, 2, 3), 17)), 24);
    assert_eq!(vrf_of(&fx, "fib", &udp4_frame(Ipv4Addr::new(10, 1, 9, 3), 17)), 16);
    assert_eq!(vrf_of(&fx, "fib", &udp4_frame(Ipv4Addr::new(10, 9, 9, 3), 17)), 8);
    assert_eq!(vrf_of(&fx, "fib", &udp4_frame(Ipv4Addr::new(11, 1, 2, 3), 17)), 0);
    fx.shutdown().await;
}

#[tokio::test]
async fn set_membership_is_byte_equality() {
    let fx = Fixture::new();
    fx.engine
        .set_create(CTX, Some("protos"), vec![vec![47], vec![17]])
        .unwrap();
    fx.engine.table_create(CTX, TableDesc::flow("acl", 1)).unwrap();
    fx.engine
        .table_entry_add(
            CTX,
            "acl",
            vec![(
                EntryDesc::flow(0, 1, vec![]).with_qualifier(FieldNum::IpProto, "protos"),
                vec![Action::set_u64(FieldNum::PacketVrf, 1)],
            )],
        )
        .unwrap();

    let dst = Ipv4Addr::new(10, 0, 0, 2);
    assert_eq!(vrf_of(&fx, "acl", &udp4_frame(dst, 17)), 1);
    assert_eq!(vrf_of(&fx, "acl", &udp4_frame(dst, 47)), 1);
    assert_eq!(vrf_of(&fx, "acl", &udp4_frame(dst, 1)), 0);

    fx.engine.set_update(CTX, "protos", vec![vec![1]]).unwrap();
    assert_eq!(vrf_of(&fx, "acl", &udp4_frame(dst, 17)), 0);
    assert_eq!(vrf_of(&fx, "acl", &udp4_frame(dst, 1)), 1);
    fx.shutdown().await;
}

#[tokio::test]
async fn input_counters_match_frames() {
    let fx = Fixture::new();
    fx.kernel_ports(&["eth2"]);
    fx.engine
        .port_create(
            CTX,
            PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() })
                .with_input(vec![Action::transmit("eth2")]),
        )
        .unwrap();

    let mut octets = 0u64;
    for i in 0..10u8 {
        let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, i), 17);
        octets += frame.len() as u64;
        fx.engine
            .packet_inject(CTX, "eth1", Direction::Ingress, &frame, &[])
            .unwrap();
    }

    let port = fx.engine.context(CTX).unwrap().port("eth1").unwrap();
    let counters = port.base().counters();
    let rx = counters.get(CounterId::RxPackets).unwrap();
    assert_eq!((rx.packets, rx.octets), (10, octets));
    assert_eq!(counters.packets(CounterId::RxUnicast), 10);
    assert_eq!(counters.packets(CounterId::RxNonUnicast), 0);
    for id in [CounterId::RxDrop, CounterId::RxAdminDrop, CounterId::RxBadPackets, CounterId::RxError] {
        assert_eq!(counters.packets(id), 0, "{}", id);
    }
    assert_eq!(fx.peer("eth2").drain().len(), 10);
    fx.shutdown().await;
}

#[tokio::test]
async fn aggregate_selection_is_stable() {
    let fx = Fixture::new();
    let members = ["p1", "p2", "p3", "p4"];
    fx.kernel_ports(&members);
    let cfg = AggregateConfig {
        algorithm: HashAlgorithm::Crc32,
        hash_fields: vec![FieldNum::IpAddrSrc.into(), FieldNum::IpAddrDst.into()],
        members: members.into_iter().map(AggregateMember::new).collect(),
        ..Default::default()
    };
    fx.engine
        .port_create(CTX, PortDesc::new("ag", PortConfig::Aggregate(cfg)))
        .unwrap();

    let frame = udp4_frame(Ipv4Addr::new(10, 7, 7, 7), 17);
    for _ in 0..20 {
        fx.engine
            .packet_inject(CTX, "ag", Direction::Egress, &frame, &[])
            .unwrap();
    }
    let counts: Vec<usize> = members.iter().map(|m| fx.peer(m).drain().len()).collect();
    assert_eq!(counts.iter().sum::<usize>(), 20);
    assert_eq!(counts.iter().filter(|c| **c > 0).count(), 1);
    fx.shutdown().await;
}

#[tokio::test]
async fn delete_is_idempotent_and_guarded() {
    let fx = Fixture::new();
    fx.engine.set_create(CTX, Some("s"), vec![]).unwrap();
    fx.engine.object_delete(CTX, "s").unwrap();
    assert!(fx.engine.object_delete(CTX, "s").unwrap_err().is_not_found());

    fx.kernel_ports(&["eth1"]);
    fx.engine
        .table_create(CTX, TableDesc::exact("t", vec![FieldNum::IpProto.into()]))
        .unwrap();
    fx.engine
        .table_entry_add(
            CTX,
            "t",
            vec![(
                EntryDesc::new(vec![EntryKey::new(FieldNum::IpProto, vec![6])]),
                vec![Action::transmit("eth1")],
            )],
        )
        .unwrap();
    fx.engine.object_delete(CTX, "t").unwrap();
    assert!(matches!(
        fx.engine.object_counters(CTX, "t"),
        Err(FwdError::NotFound(_))
    ));
    fx.shutdown().await;
}
