//! MAC address type with safe parsing and formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// # Examples
///
/// ```
/// use vdp_types::MacAddress;
///
/// let mac: MacAddress = "10:10:10:10:10:10".parse().unwrap();
/// assert_eq!(mac.to_string(), "10:10:10:10:10:10");
/// assert!(mac.is_unicast());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast MAC address (ff:ff:ff:ff:ff:ff).
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// The all-zero MAC address.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// An all-ones mask, used when a MAC must match exactly.
    pub const EXACT_MASK: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Builds a MAC from the trailing six bytes of `bytes`.
    ///
    /// Shorter inputs are left-padded with zeroes, matching the canonical
    /// form fields are read in.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; 6];
        let take = bytes.len().min(6);
        out[6 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
        MacAddress(out)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns true if the group bit (LSB of the first octet) is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub const fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(mac: MacAddress) -> [u8; 6] {
        mac.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_both_separators() {
        let a: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let b: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.octets(), [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:zz".parse::<MacAddress>().is_err());
        assert!("000:11:22:33:44:55".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_group_bit() {
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!("01:00:5e:00:00:01".parse::<MacAddress>().unwrap().is_multicast());
        assert!("10:10:10:10:10:10".parse::<MacAddress>().unwrap().is_unicast());
    }

    #[test]
    fn test_from_slice_pads_and_truncates() {
        assert_eq!(
            MacAddress::from_slice(&[1, 2]),
            MacAddress::new([0, 0, 0, 0, 1, 2])
        );
        assert_eq!(
            MacAddress::from_slice(&[9, 9, 1, 2, 3, 4, 5, 6]),
            MacAddress::new([1, 2, 3, 4, 5, 6])
        );
    }

    #[test]
    fn test_serde_as_string() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let s: String = mac.into();
        assert_eq!(s, "aa:bb:cc:dd:ee:ff");
        assert_eq!(MacAddress::try_from(s).unwrap(), mac);
    }
}
