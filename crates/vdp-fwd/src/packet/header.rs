//! Header kinds, wire layouts and the parse graph.

use crate::error::{FwdError, Result};
use crate::field::{FieldNum, HeaderGroup};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_QINQ: u16 = 0x88a8;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
pub const ETHERTYPE_MPLS: u16 = 0x8847;
pub const ETHERTYPE_LLDP: u16 = 0x88cc;
pub const ETHERTYPE_LACP: u16 = 0x8809;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_IPIP: u8 = 4;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_IPV6: u8 = 41;
pub const IPPROTO_ICMPV6: u8 = 58;
pub const IPPROTO_MPLS: u8 = 137;

/// UDP destination port for MPLS-in-UDP (RFC 7510).
pub const UDP_PORT_MPLS: u16 = 6635;

/// Header kinds understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HeaderId {
    Ethernet,
    Vlan,
    Arp,
    Ipv4,
    Ipv6,
    Udp,
    Tcp,
    Icmp,
    Icmp6,
    Mpls,
    /// Stops parsing; everything that follows is payload.
    Opaque,
}

impl HeaderId {
    pub const fn group(&self) -> HeaderGroup {
        match self {
            HeaderId::Ethernet | HeaderId::Vlan => HeaderGroup::L2,
            HeaderId::Arp | HeaderId::Ipv4 | HeaderId::Ipv6 => HeaderGroup::L3,
            HeaderId::Udp | HeaderId::Tcp | HeaderId::Icmp | HeaderId::Icmp6 => HeaderGroup::L4,
            HeaderId::Mpls => HeaderGroup::Mpls,
            HeaderId::Opaque => HeaderGroup::Payload,
        }
    }

    /// Returns true if `child` may directly follow `self` on the wire.
    pub fn is_parent_of(&self, child: HeaderId) -> bool {
        use HeaderId::*;
        match self {
            Ethernet | Vlan => matches!(child, Vlan | Arp | Ipv4 | Ipv6 | Mpls),
            Ipv4 => matches!(child, Ipv4 | Ipv6 | Udp | Tcp | Icmp | Mpls),
            Ipv6 => matches!(child, Ipv4 | Ipv6 | Udp | Tcp | Icmp6 | Mpls),
            Udp => matches!(child, Mpls),
            Mpls => matches!(child, Mpls | Ipv4 | Ipv6 | Ethernet),
            Arp | Tcp | Icmp | Icmp6 | Opaque => false,
        }
    }

    /// A well-formed default header of this kind, used when an encap
    /// supplies no bytes.
    pub fn template(&self) -> Vec<u8> {
        match self {
            HeaderId::Ethernet => vec![0; 14],
            HeaderId::Vlan => vec![0; 4],
            HeaderId::Arp => {
                let mut h = vec![0; 28];
                h[1] = 1;
                h[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
                h[4] = 6;
                h[5] = 4;
                h
            }
            HeaderId::Ipv4 => {
                let mut h = vec![0; 20];
                h[0] = 0x45;
                h[8] = 64;
                h
            }
            HeaderId::Ipv6 => {
                let mut h = vec![0; 40];
                h[0] = 0x60;
                h[7] = 64;
                h
            }
            HeaderId::Udp => vec![0; 8],
            HeaderId::Tcp => {
                let mut h = vec![0; 20];
                h[12] = 0x50;
                h
            }
            HeaderId::Icmp | HeaderId::Icmp6 => vec![0; 4],
            HeaderId::Mpls => vec![0, 0, 1, 64],
            HeaderId::Opaque => Vec::new(),
        }
    }

    /// Length of the header at the start of `data`.
    pub fn wire_len(&self, data: &[u8]) -> Result<usize> {
        let need = |n: usize| -> Result<usize> {
            if data.len() < n {
                Err(FwdError::parse(format!(
                    "{} header truncated: {} of {} bytes",
                    self,
                    data.len(),
                    n
                )))
            } else {
                Ok(n)
            }
        };
        match self {
            HeaderId::Ethernet => need(14),
            HeaderId::Vlan | HeaderId::Icmp | HeaderId::Icmp6 | HeaderId::Mpls => need(4),
            HeaderId::Arp => need(28),
            HeaderId::Ipv4 => {
                need(20)?;
                if data[0] >> 4 != 4 {
                    return Err(FwdError::parse("IPv4 header with wrong version"));
                }
                let ihl = usize::from(data[0] & 0x0f) * 4;
                if ihl < 20 {
                    return Err(FwdError::parse(format!("IPv4 IHL {} too short", ihl)));
                }
                need(ihl)
            }
            HeaderId::Ipv6 => {
                need(40)?;
                if data[0] >> 4 != 6 {
                    return Err(FwdError::parse("IPv6 header with wrong version"));
                }
                Ok(40)
            }
            HeaderId::Udp => need(8),
            HeaderId::Tcp => {
                need(20)?;
                let off = usize::from(data[12] >> 4) * 4;
                if off < 20 {
                    return Err(FwdError::parse(format!("TCP data offset {} too short", off)));
                }
                need(off)
            }
            HeaderId::Opaque => Ok(0),
        }
    }

    /// Decides which header follows `header`; `rest` is everything after it.
    pub(crate) fn next(&self, header: &[u8], rest: &[u8]) -> Option<HeaderId> {
        if rest.is_empty() {
            return None;
        }
        match self {
            HeaderId::Ethernet => from_ethertype(u16::from_be_bytes([header[12], header[13]])),
            HeaderId::Vlan => from_ethertype(u16::from_be_bytes([header[2], header[3]])),
            HeaderId::Ipv4 => from_ip_proto(header[9], false),
            HeaderId::Ipv6 => from_ip_proto(header[6], true),
            HeaderId::Udp => {
                let dst = u16::from_be_bytes([header[2], header[3]]);
                (dst == UDP_PORT_MPLS).then_some(HeaderId::Mpls)
            }
            HeaderId::Mpls => {
                if header[2] & 0x01 == 0 {
                    return Some(HeaderId::Mpls);
                }
                match rest[0] >> 4 {
                    4 => Some(HeaderId::Ipv4),
                    6 => Some(HeaderId::Ipv6),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Bit offset and width of `num` within this header, if it carries it.
    pub fn layout(&self, num: FieldNum) -> Option<(usize, usize)> {
        use FieldNum::*;
        match (self, num) {
            (HeaderId::Ethernet, EtherMacDst) => Some((0, 48)),
            (HeaderId::Ethernet, EtherMacSrc) => Some((48, 48)),
            (HeaderId::Ethernet, EtherType) => Some((96, 16)),
            (HeaderId::Vlan, VlanTag) => Some((0, 16)),
            (HeaderId::Vlan, EtherType) => Some((16, 16)),
            (HeaderId::Arp, ArpSmac) => Some((64, 48)),
            (HeaderId::Arp, ArpSpa) => Some((112, 32)),
            (HeaderId::Arp, ArpTmac) => Some((144, 48)),
            (HeaderId::Arp, ArpTpa) => Some((192, 32)),
            (HeaderId::Ipv4, IpVersion) => Some((0, 4)),
            (HeaderId::Ipv4, IpQos) => Some((8, 8)),
            (HeaderId::Ipv4, IpHop) => Some((64, 8)),
            (HeaderId::Ipv4, IpProto) => Some((72, 8)),
            (HeaderId::Ipv4, IpAddrSrc) => Some((96, 32)),
            (HeaderId::Ipv4, IpAddrDst) => Some((128, 32)),
            (HeaderId::Ipv6, IpVersion) => Some((0, 4)),
            (HeaderId::Ipv6, IpQos) => Some((4, 8)),
            (HeaderId::Ipv6, Ip6Flow) => Some((12, 20)),
            (HeaderId::Ipv6, IpProto) => Some((48, 8)),
            (HeaderId::Ipv6, IpHop) => Some((56, 8)),
            (HeaderId::Ipv6, IpAddrSrc) => Some((64, 128)),
            (HeaderId::Ipv6, IpAddrDst) => Some((192, 128)),
            (HeaderId::Udp | HeaderId::Tcp, L4PortSrc) => Some((0, 16)),
            (HeaderId::Udp | HeaderId::Tcp, L4PortDst) => Some((16, 16)),
            (HeaderId::Tcp, TcpFlags) => Some((104, 8)),
            (HeaderId::Icmp | HeaderId::Icmp6, IcmpType) => Some((0, 8)),
            (HeaderId::Icmp | HeaderId::Icmp6, IcmpCode) => Some((8, 8)),
            (HeaderId::Mpls, MplsLabel) => Some((0, 20)),
            (HeaderId::Mpls, MplsTc) => Some((20, 3)),
            (HeaderId::Mpls, MplsTtl) => Some((24, 8)),
            _ => None,
        }
    }
}

fn from_ethertype(ether_type: u16) -> Option<HeaderId> {
    match ether_type {
        ETHERTYPE_VLAN | ETHERTYPE_QINQ => Some(HeaderId::Vlan),
        ETHERTYPE_ARP => Some(HeaderId::Arp),
        ETHERTYPE_IPV4 => Some(HeaderId::Ipv4),
        ETHERTYPE_IPV6 => Some(HeaderId::Ipv6),
        ETHERTYPE_MPLS => Some(HeaderId::Mpls),
        _ => None,
    }
}

fn from_ip_proto(proto: u8, v6: bool) -> Option<HeaderId> {
    match proto {
        IPPROTO_UDP => Some(HeaderId::Udp),
        IPPROTO_TCP => Some(HeaderId::Tcp),
        IPPROTO_ICMP if !v6 => Some(HeaderId::Icmp),
        IPPROTO_ICMPV6 if v6 => Some(HeaderId::Icmp6),
        IPPROTO_IPIP => Some(HeaderId::Ipv4),
        IPPROTO_IPV6 => Some(HeaderId::Ipv6),
        IPPROTO_MPLS => Some(HeaderId::Mpls),
        _ => None,
    }
}

/// Ethertype announcing `child`, for link-layer parents.
pub(crate) fn ethertype_for(child: HeaderId) -> Option<u16> {
    match child {
        HeaderId::Vlan => Some(ETHERTYPE_VLAN),
        HeaderId::Arp => Some(ETHERTYPE_ARP),
        HeaderId::Ipv4 => Some(ETHERTYPE_IPV4),
        HeaderId::Ipv6 => Some(ETHERTYPE_IPV6),
        HeaderId::Mpls => Some(ETHERTYPE_MPLS),
        _ => None,
    }
}

/// IP protocol number announcing `child`, for IP parents.
pub(crate) fn ip_proto_for(child: HeaderId) -> Option<u8> {
    match child {
        HeaderId::Udp => Some(IPPROTO_UDP),
        HeaderId::Tcp => Some(IPPROTO_TCP),
        HeaderId::Icmp => Some(IPPROTO_ICMP),
        HeaderId::Icmp6 => Some(IPPROTO_ICMPV6),
        HeaderId::Ipv4 => Some(IPPROTO_IPIP),
        HeaderId::Ipv6 => Some(IPPROTO_IPV6),
        HeaderId::Mpls => Some(IPPROTO_MPLS),
        _ => None,
    }
}

impl fmt::Display for HeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HeaderId::Ethernet => "ETHERNET",
            HeaderId::Vlan => "VLAN",
            HeaderId::Arp => "ARP",
            HeaderId::Ipv4 => "IP4",
            HeaderId::Ipv6 => "IP6",
            HeaderId::Udp => "UDP",
            HeaderId::Tcp => "TCP",
            HeaderId::Icmp => "ICMP",
            HeaderId::Icmp6 => "ICMP6",
            HeaderId::Mpls => "MPLS",
            HeaderId::Opaque => "OPAQUE",
        };
        f.write_str(s)
    }
}

impl FromStr for HeaderId {
    type Err = FwdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ETHERNET" => Ok(HeaderId::Ethernet),
            "VLAN" => Ok(HeaderId::Vlan),
            "ARP" => Ok(HeaderId::Arp),
            "IP4" | "IPV4" => Ok(HeaderId::Ipv4),
            "IP6" | "IPV6" => Ok(HeaderId::Ipv6),
            "UDP" => Ok(HeaderId::Udp),
            "TCP" => Ok(HeaderId::Tcp),
            "ICMP" => Ok(HeaderId::Icmp),
            "ICMP6" => Ok(HeaderId::Icmp6),
            "MPLS" => Ok(HeaderId::Mpls),
            "OPAQUE" => Ok(HeaderId::Opaque),
            _ => Err(FwdError::invalid_argument(format!("unknown header {}", s))),
        }
    }
}

/// One parsed header: its kind and a private copy of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub(crate) id: HeaderId,
    pub(crate) data: Vec<u8>,
    /// Lengths, checksums and next-type fields are recomputed on rebuild.
    pub(crate) fixup: bool,
    /// Modified in place; IPv4 checksums are recomputed on rebuild.
    pub(crate) dirty: bool,
}

impl Header {
    pub(crate) fn new(id: HeaderId, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            fixup: false,
            dirty: false,
        }
    }

    pub fn id(&self) -> HeaderId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Reads `len` bits starting at bit `off` (MSB first).
pub(crate) fn read_bits(data: &[u8], off: usize, len: usize) -> u128 {
    (off..off + len).fold(0u128, |acc, bit| {
        let b = (data[bit / 8] >> (7 - bit % 8)) & 1;
        (acc << 1) | u128::from(b)
    })
}

/// Writes the low `len` bits of `value` starting at bit `off` (MSB first).
pub(crate) fn write_bits(data: &mut [u8], off: usize, len: usize, value: u128) {
    for i in 0..len {
        let bit = off + i;
        let set = (value >> (len - 1 - i)) & 1 == 1;
        let mask = 1u8 << (7 - bit % 8);
        if set {
            data[bit / 8] |= mask;
        } else {
            data[bit / 8] &= !mask;
        }
    }
}

/// RFC 1071 internet checksum.
pub(crate) fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|c| {
            let hi = u32::from(c[0]) << 8;
            let lo = c.get(1).map(|b| u32::from(*b)).unwrap_or(0);
            hi | lo
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_round_trip() {
        let mut data = [0u8; 4];
        write_bits(&mut data, 0, 20, 100);
        write_bits(&mut data, 23, 1, 1);
        assert_eq!(read_bits(&data, 0, 20), 100);
        assert_eq!(data, [0x00, 0x06, 0x41, 0x00]);
    }

    #[test]
    fn test_ipv4_checksum() {
        // Example header from RFC 1071 discussions, checksum field zeroed.
        let hdr = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(internet_checksum(&hdr), 0xb861);
    }

    #[test]
    fn test_wire_len_rejects_truncation() {
        assert!(HeaderId::Ethernet.wire_len(&[0; 10]).is_err());
        assert!(HeaderId::Ipv4.wire_len(&[0x46; 20]).is_err());
        assert_eq!(HeaderId::Ipv6.wire_len(&HeaderId::Ipv6.template()).unwrap(), 40);
    }

    #[test]
    fn test_parent_relation() {
        assert!(HeaderId::Ethernet.is_parent_of(HeaderId::Ipv6));
        assert!(HeaderId::Udp.is_parent_of(HeaderId::Mpls));
        assert!(!HeaderId::Tcp.is_parent_of(HeaderId::Ipv4));
    }
}
