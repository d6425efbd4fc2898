//! Packet field identifiers.
//!
//! Every field has a canonical size in bytes. Tables always see a field as a
//! big-endian value left-padded with zeroes to that size, whatever its width
//! on the wire.

use crate::error::{FwdError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! field_numbers {
    ($($variant:ident => ($name:literal, $size:expr, $meta:expr)),* $(,)?) => {
        /// Known packet field numbers.
        ///
        /// Header fields are read from the parsed header stack. Metadata
        /// fields live beside the packet and are never serialized.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum FieldNum {
            $($variant,)*
        }

        impl FieldNum {
            /// Every field number, in declaration order.
            pub const ALL: &'static [FieldNum] = &[$(FieldNum::$variant,)*];

            /// Canonical size in bytes.
            pub const fn size(&self) -> usize {
                match self {
                    $(FieldNum::$variant => $size,)*
                }
            }

            /// Returns true if the field is packet metadata rather than a
            /// header field.
            pub const fn is_metadata(&self) -> bool {
                match self {
                    $(FieldNum::$variant => $meta,)*
                }
            }

            pub const fn name(&self) -> &'static str {
                match self {
                    $(FieldNum::$variant => $name,)*
                }
            }
        }

        impl FromStr for FieldNum {
            type Err = FwdError;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_uppercase().as_str() {
                    $($name => Ok(FieldNum::$variant),)*
                    _ => Err(FwdError::invalid_argument(format!("unknown field {}", s))),
                }
            }
        }
    };
}

field_numbers! {
    EtherMacSrc => ("ETHER_MAC_SRC", 6, false),
    EtherMacDst => ("ETHER_MAC_DST", 6, false),
    EtherType => ("ETHER_TYPE", 2, false),
    VlanTag => ("VLAN_TAG", 2, false),
    IpVersion => ("IP_VERSION", 1, false),
    IpAddrSrc => ("IP_ADDR_SRC", 16, false),
    IpAddrDst => ("IP_ADDR_DST", 16, false),
    IpHop => ("IP_HOP", 1, false),
    IpProto => ("IP_PROTO", 1, false),
    IpQos => ("IP_QOS", 1, false),
    Ip6Flow => ("IP6_FLOW", 3, false),
    L4PortSrc => ("L4_PORT_SRC", 2, false),
    L4PortDst => ("L4_PORT_DST", 2, false),
    TcpFlags => ("TCP_FLAGS", 1, false),
    IcmpType => ("ICMP_TYPE", 1, false),
    IcmpCode => ("ICMP_CODE", 1, false),
    ArpSpa => ("ARP_SPA", 4, false),
    ArpTpa => ("ARP_TPA", 4, false),
    ArpSmac => ("ARP_SMAC", 6, false),
    ArpTmac => ("ARP_TMAC", 6, false),
    MplsLabel => ("MPLS_LABEL", 3, false),
    MplsTc => ("MPLS_TC", 1, false),
    MplsTtl => ("MPLS_TTL", 1, false),
    PacketPortInput => ("PACKET_PORT_INPUT", 8, true),
    PacketPortOutput => ("PACKET_PORT_OUTPUT", 8, true),
    PacketVrf => ("PACKET_VRF", 8, true),
    PacketLength => ("PACKET_LENGTH", 8, true),
    NextHopId => ("NEXT_HOP_ID", 8, true),
    NextHopGroupId => ("NEXT_HOP_GROUP_ID", 8, true),
    NextHopIp => ("NEXT_HOP_IP", 16, true),
    TrapId => ("TRAP_ID", 8, true),
    InputIface => ("INPUT_IFACE", 8, true),
    OutputIface => ("OUTPUT_IFACE", 8, true),
    HostPortId => ("HOST_PORT_ID", 8, true),
}

impl fmt::Display for FieldNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Header groups addressable by user-defined fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HeaderGroup {
    /// Ethernet and VLAN headers.
    L2,
    /// ARP, IPv4 and IPv6 headers.
    L3,
    /// UDP, TCP, ICMP and ICMPv6 headers.
    L4,
    Mpls,
    /// The opaque bytes after the last parsed header.
    Payload,
}

impl fmt::Display for HeaderGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HeaderGroup::L2 => "L2",
            HeaderGroup::L3 => "L3",
            HeaderGroup::L4 => "L4",
            HeaderGroup::Mpls => "MPLS",
            HeaderGroup::Payload => "PAYLOAD",
        };
        f.write_str(s)
    }
}

/// Identifies one field of a packet.
///
/// Instance 0 is the outermost occurrence. A user-defined field reads
/// `size` bytes at `offset` within the `instance`-th header of `group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldId {
    Known {
        num: FieldNum,
        instance: u8,
    },
    Udf {
        group: HeaderGroup,
        offset: u16,
        size: u8,
        instance: u8,
    },
}

impl FieldId {
    /// The outermost instance of `num`.
    pub const fn new(num: FieldNum) -> Self {
        FieldId::Known { num, instance: 0 }
    }

    pub const fn with_instance(num: FieldNum, instance: u8) -> Self {
        FieldId::Known { num, instance }
    }

    pub const fn udf(group: HeaderGroup, offset: u16, size: u8, instance: u8) -> Self {
        FieldId::Udf {
            group,
            offset,
            size,
            instance,
        }
    }

    /// Canonical size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            FieldId::Known { num, .. } => num.size(),
            FieldId::Udf { size, .. } => *size as usize,
        }
    }

    pub const fn num(&self) -> Option<FieldNum> {
        match self {
            FieldId::Known { num, .. } => Some(*num),
            FieldId::Udf { .. } => None,
        }
    }

    pub const fn instance(&self) -> u8 {
        match self {
            FieldId::Known { instance, .. } | FieldId::Udf { instance, .. } => *instance,
        }
    }

    pub const fn is_metadata(&self) -> bool {
        match self {
            FieldId::Known { num, .. } => num.is_metadata(),
            FieldId::Udf { .. } => false,
        }
    }
}

impl From<FieldNum> for FieldId {
    fn from(num: FieldNum) -> Self {
        FieldId::new(num)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldId::Known { num, instance: 0 } => write!(f, "{}", num),
            FieldId::Known { num, instance } => write!(f, "{}[{}]", num, instance),
            FieldId::Udf {
                group,
                offset,
                size,
                instance,
            } => write!(f, "UDF({}[{}]+{}:{})", group, instance, offset, size),
        }
    }
}

impl FromStr for FieldId {
    type Err = FwdError;

    /// Parses `NAME` or `NAME[instance]`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('[') {
            Some((name, rest)) => {
                let instance = rest
                    .strip_suffix(']')
                    .and_then(|i| i.parse::<u8>().ok())
                    .ok_or_else(|| FwdError::invalid_argument(format!("bad field {}", s)))?;
                Ok(FieldId::with_instance(name.parse()?, instance))
            }
            None => Ok(FieldId::new(s.parse()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_sizes() {
        assert_eq!(FieldNum::IpAddrDst.size(), 16);
        assert_eq!(FieldNum::L4PortDst.size(), 2);
        assert_eq!(FieldNum::PacketPortInput.size(), 8);
        assert_eq!(FieldId::udf(HeaderGroup::L4, 2, 3, 0).size(), 3);
    }

    #[test]
    fn test_metadata_classification() {
        assert!(FieldNum::PacketVrf.is_metadata());
        assert!(FieldNum::NextHopIp.is_metadata());
        assert!(!FieldNum::IpHop.is_metadata());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "ip_addr_dst".parse::<FieldId>().unwrap(),
            FieldId::new(FieldNum::IpAddrDst)
        );
        assert_eq!(
            "MPLS_LABEL[1]".parse::<FieldId>().unwrap(),
            FieldId::with_instance(FieldNum::MplsLabel, 1)
        );
        assert!("NOPE".parse::<FieldId>().is_err());
        assert!("IP_HOP[x]".parse::<FieldId>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for num in FieldNum::ALL {
            assert_eq!(num.to_string().parse::<FieldNum>().unwrap(), *num);
        }
        assert_eq!(FieldId::with_instance(FieldNum::IpHop, 2).to_string(), "IP_HOP[2]");
    }
}
