//! End-to-end forwarding scenarios driven through the engine.

mod common;

use common::{next_frame, udp4_frame, Fixture, CTX};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vdp_fwd::{
    Action, AggregateConfig, AggregateMember, Direction, EntryDesc, EntryKey, FieldNum, HashAlgorithm, InfoRequest,
    PortConfig, PortDesc, PortStateEvent, PortUpdate, Subscription, TableDesc,
};
use vdp_types::{AdminState, OperState};

#[tokio::test]
async fn flow_priority_then_removal() {
    let fx = Fixture::new();
    fx.engine.table_create(CTX, TableDesc::flow("flows", 1)).unwrap();
    let entry = |prio| EntryDesc::flow(0, prio, vec![EntryKey::new(FieldNum::IpProto, vec![0x01])]);
    fx.engine
        .table_entry_add(
            CTX,
            "flows",
            vec![
                (entry(10), vec![Action::set_u64(FieldNum::PacketVrf, 10)]),
                (entry(5), vec![Action::set_u64(FieldNum::PacketVrf, 5)]),
            ],
        )
        .unwrap();

    let lookup = || {
        fx.engine
            .info(
                CTX,
                InfoRequest::Lookup {
                    table: "flows".into(),
                    frame: udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 0x01),
                },
            )
            .unwrap()
            .lines
    };
    assert_eq!(
        lookup().last().unwrap(),
        "actions: Update(PACKET_VRF, Set, 0000000000000005)"
    );
    fx.engine.table_entry_remove(CTX, "flows", &[entry(5)]).unwrap();
    assert_eq!(
        lookup().last().unwrap(),
        "actions: Update(PACKET_VRF, Set, 000000000000000a)"
    );
    fx.shutdown().await;
}

#[tokio::test]
async fn admin_down_publishes_one_event() {
    let fx = Fixture::new();
    fx.kernel_ports(&["p1"]);
    let cancel = CancellationToken::new();
    let mut events = fx.engine.notify_subscribe(CTX, cancel.clone()).unwrap();

    fx.engine.port_state(CTX, "p1", Some(AdminState::Down)).unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        PortStateEvent {
            port: "p1".into(),
            nid: fx.engine.object_nid(CTX, "p1").unwrap(),
            oper: OperState::Down,
        }
    );
    // Setting the same state again is not a change.
    fx.engine.port_state(CTX, "p1", Some(AdminState::Down)).unwrap();
    assert_eq!(events.try_next(), None);

    cancel.cancel();
    assert_eq!(events.next().await, None);
    fx.shutdown().await;
}

async fn next_change(events: &mut Subscription) -> (String, OperState) {
    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    (event.port, event.oper)
}

#[tokio::test]
async fn aggregate_follows_its_members() {
    let fx = Fixture::new();
    fx.kernel_ports(&["p1", "p2"]);
    let cfg = AggregateConfig {
        members: ["p1", "p2"].into_iter().map(AggregateMember::new).collect(),
        ..Default::default()
    };
    fx.engine
        .port_create(CTX, PortDesc::new("ag", PortConfig::Aggregate(cfg)))
        .unwrap();
    assert_eq!(fx.engine.port_state(CTX, "ag", None).unwrap().oper, OperState::Up);

    let cancel = CancellationToken::new();
    let mut events = fx.engine.notify_subscribe(CTX, cancel.clone()).unwrap();

    // One member left up keeps the aggregate up.
    fx.engine.port_state(CTX, "p1", Some(AdminState::Down)).unwrap();
    assert_eq!(next_change(&mut events).await, ("p1".to_string(), OperState::Down));
    assert_eq!(fx.engine.port_state(CTX, "ag", None).unwrap().oper, OperState::Up);

    fx.engine.port_state(CTX, "p2", Some(AdminState::Down)).unwrap();
    assert_eq!(next_change(&mut events).await, ("p2".to_string(), OperState::Down));
    assert_eq!(next_change(&mut events).await, ("ag".to_string(), OperState::Down));

    fx.engine.port_state(CTX, "p2", Some(AdminState::Up)).unwrap();
    assert_eq!(next_change(&mut events).await, ("p2".to_string(), OperState::Up));
    assert_eq!(next_change(&mut events).await, ("ag".to_string(), OperState::Up));
    assert_eq!(events.try_next(), None);

    cancel.cancel();
    fx.shutdown().await;
}

#[tokio::test]
async fn aggregate_hash_then_flood() {
    let fx = Fixture::new();
    let members = ["p1", "p2", "p3", "p4"];
    fx.kernel_ports(&members);
    let cfg = AggregateConfig {
        algorithm: HashAlgorithm::Crc16,
        hash_fields: vec![FieldNum::IpProto.into()],
        members: members.into_iter().map(AggregateMember::new).collect(),
        ..Default::default()
    };
    fx.engine
        .port_create(CTX, PortDesc::new("ag", PortConfig::Aggregate(cfg)))
        .unwrap();

    let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 17);
    for proto in 0..=255u8 {
        fx.engine
            .packet_inject(
                CTX,
                "ag",
                Direction::Egress,
                &frame,
                &[(FieldNum::IpProto.into(), vec![proto])],
            )
            .unwrap();
    }
    let counts: Vec<usize> = members.iter().map(|m| fx.peer(m).drain().len()).collect();
    assert_eq!(counts.iter().sum::<usize>(), 256);
    assert!(counts.iter().filter(|c| **c > 0).count() >= 2, "{:?}", counts);

    fx.engine
        .port_update(CTX, "ag", PortUpdate::AggregateAlgorithm(HashAlgorithm::Flood))
        .unwrap();
    let p1 = fx.engine.object_nid(CTX, "p1").unwrap();
    fx.engine
        .packet_inject(
            CTX,
            "ag",
            Direction::Egress,
            &frame,
            &[(FieldNum::PacketPortInput.into(), p1.to_be_bytes().to_vec())],
        )
        .unwrap();
    for m in ["p2", "p3", "p4"] {
        assert_eq!(next_frame(&fx.peer(m)).await, frame);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    for m in members {
        assert!(fx.peer(m).try_recv().is_none(), "{} got an extra copy", m);
    }
    fx.shutdown().await;
}

#[tokio::test]
async fn lookup_chain_forwards_between_ports() {
    let fx = Fixture::new();
    fx.kernel_ports(&["eth2", "eth3"]);
    fx.engine
        .table_create(
            CTX,
            TableDesc::exact("l2", vec![FieldNum::EtherMacDst.into()]).with_default(vec![Action::Drop]),
        )
        .unwrap();
    fx.engine
        .table_entry_add(
            CTX,
            "l2",
            vec![(
                EntryDesc::new(vec![EntryKey::new(FieldNum::EtherMacDst, vec![0x02, 0, 0, 0, 0, 0x02])]),
                vec![Action::transmit("eth3")],
            )],
        )
        .unwrap();
    fx.engine
        .port_create(
            CTX,
            PortDesc::new("eth1", PortConfig::Kernel { device: "eth1".into() })
                .with_input(vec![Action::lookup("l2")]),
        )
        .unwrap();

    let frame = udp4_frame(Ipv4Addr::new(10, 0, 0, 2), 17);
    fx.peer("eth1").inject(frame.clone());
    assert_eq!(next_frame(&fx.peer("eth3")).await, frame);

    fx.peer("eth1").inject(common::multicast(frame));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.peer("eth2").try_recv().is_none());
    assert!(fx.peer("eth3").try_recv().is_none());
    fx.shutdown().await;
}
