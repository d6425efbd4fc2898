//! Network primitives shared by the virtual dataplane crates.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IpAddress`] / [`IpPrefix`]: IPv4 and IPv6 addresses and CIDR prefixes
//! - [`AdminState`] / [`OperState`]: port link state
//! - [`bytes`]: helpers for the canonical, left-padded big-endian byte form
//!   in which every value is presented to forwarding tables

pub mod bytes;
mod ip;
mod mac;
mod state;

pub use ip::{IpAddress, IpPrefix};
pub use mac::MacAddress;
pub use state::{AdminState, OperState};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid link state: {0}")]
    InvalidState(String),
}
