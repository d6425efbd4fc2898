//! SAI object APIs.
//!
//! Each submodule compiles one family of SAI objects into the switch's
//! forwarding tables:
//!
//! - [`port`]: front-panel ports and their statistics
//! - [`lag`]: LAGs and LAG members
//! - [`router`]: virtual routers, router interfaces and MyMAC entries
//! - [`neighbor`]: neighbor entries
//! - [`next_hop`]: next hops and next-hop groups
//! - [`route`]: route entries
//! - [`hostif`]: host interfaces, traps and trap groups
//! - [`acl`]: ACL table groups, tables and entries
//!
//! An API value borrows the [`Switch`](crate::Switch); get one from
//! [`Switch::port_api`](crate::Switch::port_api) and friends.

pub mod acl;
pub mod hostif;
pub mod lag;
pub mod neighbor;
pub mod next_hop;
pub mod port;
pub mod route;
pub mod router;

pub use acl::AclApi;
pub use hostif::HostifApi;
pub use lag::LagApi;
pub use neighbor::NeighborApi;
pub use next_hop::NextHopApi;
pub use port::PortApi;
pub use route::RouteApi;
pub use router::RouterApi;

use crate::attr::AttrValue;

/// What happens to a packet matched by a route, trap or ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketAction {
    Drop,
    #[default]
    Forward,
    /// Forward and send a copy to the CPU.
    Copy,
    /// Send to the CPU only.
    Trap,
    Log,
    Deny,
    Transit,
}

impl From<PacketAction> for AttrValue {
    fn from(v: PacketAction) -> Self {
        AttrValue::I32(match v {
            PacketAction::Drop => 0,
            PacketAction::Forward => 1,
            PacketAction::Copy => 2,
            PacketAction::Trap => 4,
            PacketAction::Log => 5,
            PacketAction::Deny => 7,
            PacketAction::Transit => 8,
        })
    }
}
