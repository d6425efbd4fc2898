//! A switch on loopback links with two routed ports.

#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use vdp_fwd::{Engine, HeaderId, LinkPeer, LoopbackLinks};
use vdp_sai::api::port::{PortRequest, PortSpeed};
use vdp_sai::api::router::RouterInterfaceRequest;
use vdp_sai::{PortOid, RouterInterfaceOid, Switch, SwitchConfig};
use vdp_types::MacAddress;

pub const RIF1_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x10];
pub const RIF2_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x11];

/// Ethernet + IPv6 (raw payload) from 2003::9 to `dst`, addressed to `mac`.
pub fn ip6_frame(mac: [u8; 6], dst: Ipv6Addr, hop: u8) -> Vec<u8> {
    let mut f = mac.to_vec();
    f.extend_from_slice(&[0, 0, 0, 0, 0, 1, 0x86, 0xdd]);
    let mut ip = HeaderId::Ipv6.template();
    ip[5] = 11;
    ip[6] = 59;
    ip[7] = hop;
    ip[8..24].copy_from_slice(&"2003::9".parse::<Ipv6Addr>().unwrap().octets());
    ip[24..40].copy_from_slice(&dst.octets());
    f.extend_from_slice(&ip);
    f.extend_from_slice(b"hello world");
    f
}

/// Ethernet + IPv4 + UDP from 10.0.0.1 to `dst`, addressed to `mac`.
pub fn udp4_frame(mac: [u8; 6], dst: Ipv4Addr) -> Vec<u8> {
    let mut f = mac.to_vec();
    f.extend_from_slice(&[0, 0, 0, 0, 0, 1, 0x08, 0x00]);
    let mut ip = HeaderId::Ipv4.template();
    ip[9] = 17;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&dst.octets());
    f.extend_from_slice(&ip);
    f.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0, 12, 0, 0]);
    f.extend_from_slice(b"ping");
    f
}

pub struct Fixture {
    pub switch: Switch,
    pub links: LoopbackLinks,
    pub p1: PortOid,
    pub p2: PortOid,
    pub rif1: RouterInterfaceOid,
    pub rif2: RouterInterfaceOid,
}

impl Fixture {
    /// Ports on lanes 1 and 2 (eth1, eth2), each with a router interface in
    /// the default virtual router.
    pub fn new() -> Self {
        let links = LoopbackLinks::new();
        let engine = Arc::new(Engine::new(Arc::new(links.clone())));
        let switch = Switch::create(engine, SwitchConfig::default()).unwrap();
        let port = |lane: u32| {
            switch
                .port_api()
                .create_port(&PortRequest {
                    hw_lanes: Some(vec![lane]),
                    speed: Some(PortSpeed::GE_10),
                    admin_state: Some(true),
                    ..Default::default()
                })
                .unwrap()
        };
        let (p1, p2) = (port(1), port(2));
        let rif = |port: PortOid, mac: [u8; 6]| {
            switch
                .router_api()
                .create_router_interface(&RouterInterfaceRequest {
                    virtual_router_id: Some(switch.defaults().virtual_router),
                    port_id: Some(port.as_raw()),
                    src_mac_address: Some(MacAddress::new(mac)),
                    ..Default::default()
                })
                .unwrap()
        };
        let (rif1, rif2) = (rif(p1, RIF1_MAC), rif(p2, RIF2_MAC));
        Self {
            switch,
            links,
            p1,
            p2,
            rif1,
            rif2,
        }
    }

    pub fn peer(&self, device: &str) -> LinkPeer {
        self.links.peer(device)
    }

    pub async fn shutdown(self) {
        let engine = self.switch.engine().clone();
        engine.stop();
        engine.wait().await;
        self.switch.shutdown().unwrap();
    }
}

/// The next frame `peer` receives, failing after five seconds.
pub async fn next_frame(peer: &LinkPeer) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("no frame within 5s")
        .expect("link closed")
}
