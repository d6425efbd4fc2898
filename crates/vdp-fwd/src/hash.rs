//! Packet hashing for aggregate ports and next-hop group selection.

use crate::error::{FwdError, Result};
use crate::field::FieldId;
use crate::packet::Packet;
use crc::{Crc, CRC_16_IBM_SDLC, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// How a packet picks among several candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    Crc32,
    Crc16,
    /// Every candidate gets a copy.
    Flood,
}

impl HashAlgorithm {
    pub fn is_flood(&self) -> bool {
        matches!(self, HashAlgorithm::Flood)
    }

    /// Hash of `key`. Flood has no hash and yields zero.
    pub fn hash(&self, key: &[u8]) -> u64 {
        match self {
            HashAlgorithm::Crc32 => u64::from(CRC32.checksum(key)),
            HashAlgorithm::Crc16 => u64::from(CRC16.checksum(key)),
            HashAlgorithm::Flood => 0,
        }
    }

    /// Index into a selection vector of `len` entries. `len` must be
    /// non-zero.
    pub fn index(&self, key: &[u8], len: usize) -> usize {
        (self.hash(key) % len as u64) as usize
    }
}

/// Concatenates the canonical values of `fields`. Absent fields contribute
/// zeroes so that every packet hashes.
pub fn hash_key(pkt: &Packet, fields: &[FieldId]) -> Vec<u8> {
    let mut key = Vec::with_capacity(fields.iter().map(FieldId::size).sum());
    for f in fields {
        match pkt.field(f) {
            Ok(v) => key.extend_from_slice(&v),
            Err(_) => key.extend(std::iter::repeat(0).take(f.size())),
        }
    }
    key
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Crc32 => write!(f, "crc32"),
            HashAlgorithm::Crc16 => write!(f, "crc16"),
            HashAlgorithm::Flood => write!(f, "flood"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = FwdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "crc32" | "crc" => Ok(HashAlgorithm::Crc32),
            "crc16" => Ok(HashAlgorithm::Crc16),
            "flood" => Ok(HashAlgorithm::Flood),
            _ => Err(FwdError::invalid_argument(format!("unknown hash algorithm {}", s))),
        }
    }
}
