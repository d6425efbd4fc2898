//! Wire image rebuild.

use super::header::{ethertype_for, internet_checksum, ip_proto_for, Header, HeaderId};
use super::Packet;

impl Packet {
    /// Serializes the header stack and payload.
    ///
    /// Headers marked for fixup get their next-type field, length fields
    /// and IPv4 checksum recomputed; other mutated IPv4 headers only get a
    /// fresh checksum. The packet itself is left untouched.
    pub fn frame(&self) -> Vec<u8> {
        let headers = &self.headers;
        let mut out = Vec::with_capacity(self.length());
        for (i, header) in headers.iter().enumerate() {
            let mut data = header.data.clone();
            if header.fixup {
                let next = headers.get(i + 1).map(|h| h.id);
                let rest: usize = headers[i + 1..].iter().map(|h| h.data.len()).sum::<usize>()
                    + self.payload.len();
                fixup(header, &mut data, next, rest);
            } else if header.dirty && header.id == HeaderId::Ipv4 {
                refresh_ipv4_checksum(&mut data);
            }
            out.extend_from_slice(&data);
        }
        out.extend_from_slice(&self.payload);
        out
    }
}

fn fixup(header: &Header, data: &mut [u8], next: Option<HeaderId>, rest: usize) {
    match header.id {
        HeaderId::Ethernet => {
            if let Some(t) = next.and_then(ethertype_for) {
                data[12..14].copy_from_slice(&t.to_be_bytes());
            }
        }
        HeaderId::Vlan => {
            if let Some(t) = next.and_then(ethertype_for) {
                data[2..4].copy_from_slice(&t.to_be_bytes());
            }
        }
        HeaderId::Ipv4 => {
            if let Some(p) = next.and_then(ip_proto_for) {
                data[9] = p;
            }
            let total = (data.len() + rest).min(usize::from(u16::MAX)) as u16;
            data[2..4].copy_from_slice(&total.to_be_bytes());
            refresh_ipv4_checksum(data);
        }
        HeaderId::Ipv6 => {
            if let Some(p) = next.and_then(ip_proto_for) {
                data[6] = p;
            }
            let len = rest.min(usize::from(u16::MAX)) as u16;
            data[4..6].copy_from_slice(&len.to_be_bytes());
        }
        HeaderId::Udp => {
            let len = (data.len() + rest).min(usize::from(u16::MAX)) as u16;
            data[4..6].copy_from_slice(&len.to_be_bytes());
        }
        HeaderId::Mpls => {
            if next == Some(HeaderId::Mpls) {
                data[2] &= !0x01;
            } else {
                data[2] |= 0x01;
            }
        }
        _ => {}
    }
}

fn refresh_ipv4_checksum(data: &mut [u8]) {
    data[10] = 0;
    data[11] = 0;
    let sum = internet_checksum(data);
    data[10..12].copy_from_slice(&sum.to_be_bytes());
}
