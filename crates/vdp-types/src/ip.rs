//! IP address and prefix types.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 or IPv6 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpAddress {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    pub const fn is_ipv4(&self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Maximum prefix length for this family (32 or 128).
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpAddress::V4(_) => 32,
            IpAddress::V6(_) => 128,
        }
    }

    /// IP version number (4 or 6).
    pub const fn version(&self) -> u8 {
        match self {
            IpAddress::V4(_) => 4,
            IpAddress::V6(_) => 6,
        }
    }

    /// Raw network-order octets (4 or 16 bytes).
    pub fn octets(&self) -> Vec<u8> {
        match self {
            IpAddress::V4(a) => a.octets().to_vec(),
            IpAddress::V6(a) => a.octets().to_vec(),
        }
    }

    /// Canonical 16-byte form. IPv4 addresses are left-padded with zeroes
    /// so that both families share one field width.
    pub fn to_canonical(&self) -> [u8; 16] {
        match self {
            IpAddress::V4(a) => {
                let mut out = [0u8; 16];
                out[12..].copy_from_slice(&a.octets());
                out
            }
            IpAddress::V6(a) => a.octets(),
        }
    }

    /// Rebuilds an address from raw octets; 4 bytes yield IPv4, 16 IPv6.
    pub fn from_octets(bytes: &[u8]) -> Result<Self, ParseError> {
        match bytes.len() {
            4 => Ok(IpAddress::V4(Ipv4Addr::new(
                bytes[0], bytes[1], bytes[2], bytes[3],
            ))),
            16 => {
                let mut b = [0u8; 16];
                b.copy_from_slice(bytes);
                Ok(IpAddress::V6(Ipv6Addr::from(b)))
            }
            n => Err(ParseError::InvalidIpAddress(format!("{} octets", n))),
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(a) => write!(f, "{}", a),
            IpAddress::V6(a) => write!(f, "{}", a),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(IpAddress::from)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => IpAddress::V4(a),
            IpAddr::V6(a) => IpAddress::V6(a),
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(addr)
    }
}

impl From<IpAddress> for IpAddr {
    fn from(addr: IpAddress) -> Self {
        match addr {
            IpAddress::V4(a) => IpAddr::V4(a),
            IpAddress::V6(a) => IpAddr::V6(a),
        }
    }
}

/// An IP prefix in CIDR notation.
///
/// # Examples
///
/// ```
/// use vdp_types::IpPrefix;
///
/// let prefix: IpPrefix = "10.0.0.0/8".parse().unwrap();
/// assert_eq!(prefix.prefix_len(), 8);
/// assert!(prefix.contains(&"10.1.2.3".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpPrefix {
    address: IpAddress,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a prefix, failing if `prefix_len` exceeds the family width.
    pub fn new(address: IpAddress, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > address.max_prefix_len() {
            return Err(ParseError::InvalidIpPrefix(format!(
                "{}/{}",
                address, prefix_len
            )));
        }
        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// Builds a prefix from an address and a netmask of the same family.
    /// The mask must be contiguous.
    pub fn from_mask(address: IpAddress, mask: IpAddress) -> Result<Self, ParseError> {
        if address.is_ipv4() != mask.is_ipv4() {
            return Err(ParseError::InvalidIpPrefix(format!("{} mask {}", address, mask)));
        }
        let bits = mask.octets();
        let len: u32 = bits.iter().map(|b| b.count_ones()).sum();
        let expected = crate::bytes::prefix_mask(bits.len(), len as usize);
        if expected != bits {
            return Err(ParseError::InvalidIpPrefix(format!("non-contiguous mask {}", mask)));
        }
        Self::new(address, len as u8)
    }

    pub const fn address(&self) -> &IpAddress {
        &self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// Returns true for a full-length host route.
    pub const fn is_host(&self) -> bool {
        self.prefix_len == self.address.max_prefix_len()
    }

    /// Returns true for a default route (0.0.0.0/0 or ::/0).
    pub const fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    /// The network address with host bits cleared.
    pub fn network(&self) -> IpAddress {
        let octets = self.address.octets();
        let mask = crate::bytes::prefix_mask(octets.len(), self.prefix_len as usize);
        let masked: Vec<u8> = octets.iter().zip(&mask).map(|(a, m)| a & m).collect();
        // Lengths always agree with the family.
        IpAddress::from_octets(&masked).unwrap_or(self.address)
    }

    /// Canonical 16-byte network address plus the number of significant
    /// bits within that width.
    pub fn to_canonical(&self) -> ([u8; 16], usize) {
        let extra = 128 - self.address.max_prefix_len() as usize;
        (self.network().to_canonical(), extra + self.prefix_len as usize)
    }

    /// Returns true if `addr` falls within this prefix.
    pub fn contains(&self, addr: &IpAddress) -> bool {
        if addr.is_ipv4() != self.address.is_ipv4() {
            return false;
        }
        let mask = crate::bytes::prefix_mask(addr.octets().len(), self.prefix_len as usize);
        addr.octets()
            .iter()
            .zip(self.address.octets())
            .zip(mask)
            .all(|((a, p), m)| a & m == p & m)
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };
        let address: IpAddress = addr
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;
        let prefix_len = match len {
            Some(l) => l
                .parse::<u8>()
                .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?,
            None => address.max_prefix_len(),
        };
        IpPrefix::new(address, prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_canonical_v4_is_left_padded() {
        let a: IpAddress = "10.0.0.1".parse().unwrap();
        let c = a.to_canonical();
        assert_eq!(&c[..12], &[0u8; 12]);
        assert_eq!(&c[12..], &[10, 0, 0, 1]);
    }

    #[test]
    fn test_prefix_parse_and_display() {
        let p: IpPrefix = "2001:db8::/32".parse().unwrap();
        assert_eq!(p.prefix_len(), 32);
        assert_eq!(p.to_string(), "2001:db8::/32");

        let host: IpPrefix = "192.168.1.1".parse().unwrap();
        assert!(host.is_host());
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_prefix_network_and_contains() {
        let p: IpPrefix = "10.1.2.3/16".parse().unwrap();
        assert_eq!(p.network().to_string(), "10.1.0.0");
        assert!(p.contains(&"10.1.200.1".parse().unwrap()));
        assert!(!p.contains(&"10.2.0.1".parse().unwrap()));
        assert!(!p.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_prefix_canonical_len() {
        let v4: IpPrefix = "10.0.0.0/8".parse().unwrap();
        assert_eq!(v4.to_canonical().1, 104);
        let v6: IpPrefix = "2001:db8::/48".parse().unwrap();
        assert_eq!(v6.to_canonical().1, 48);
    }

    #[test]
    fn test_prefix_from_mask() {
        let p = IpPrefix::from_mask(
            "10.0.0.0".parse().unwrap(),
            "255.255.255.0".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(p.prefix_len(), 24);
        assert!(IpPrefix::from_mask(
            "10.0.0.0".parse().unwrap(),
            "255.0.255.0".parse().unwrap()
        )
        .is_err());
    }
}
