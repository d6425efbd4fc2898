//! Shared fixtures for the forwarding integration tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use vdp_fwd::{Engine, HeaderId, LinkPeer, LoopbackLinks, PortConfig, PortDesc};

pub const CTX: &str = "test";

/// Ethernet + IPv4 + UDP from 10.0.0.1 to `dst` with a short payload.
pub fn udp4_frame(dst: Ipv4Addr, proto: u8) -> Vec<u8> {
    let mut f = vec![
        0x02, 0, 0, 0, 0, 0x02, // dst
        0x02, 0, 0, 0, 0, 0x01, // src
        0x08, 0x00,
    ];
    let mut ip = HeaderId::Ipv4.template();
    ip[9] = proto;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&dst.octets());
    f.extend_from_slice(&ip);
    f.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0, 12, 0, 0]);
    f.extend_from_slice(b"ping");
    f
}

/// The same frame with the multicast bit set in the destination MAC.
pub fn multicast(mut frame: Vec<u8>) -> Vec<u8> {
    frame[0] |= 0x01;
    frame
}

/// Ethernet + IPv6 (raw payload) from 2003::9 to `dst`.
pub fn ip6_frame(dst: Ipv6Addr, hop: u8) -> Vec<u8> {
    let mut f = vec![0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0, 0, 0, 0, 0, 1, 0x86, 0xdd];
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

/// An engine with one context and a loopback link provider.
pub struct Fixture {
    pub engine: Engine,
    pub links: LoopbackLinks,
}

impl Fixture {
    pub fn new() -> Self {
        let links = LoopbackLinks::new();
        let engine = Engine::new(Arc::new(links.clone()));
        engine.context_create(CTX).unwrap();
        Self { engine, links }
    }

    /// Creates kernel ports named after their devices.
    pub fn kernel_ports(&self, names: &[&str]) {
        for name in names {
            self.engine
                .port_create(CTX, PortDesc::new(*name, PortConfig::Kernel { device: name.to_string() }))
                .unwrap();
        }
    }

    pub fn peer(&self, device: &str) -> LinkPeer {
        self.links.peer(device)
    }

    pub async fn shutdown(self) {
        self.engine.stop();
        self.engine.wait().await;
    }
}

/// Waits for the next frame transmitted on `peer`.
pub async fn next_frame(peer: &LinkPeer) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("link closed")
}
