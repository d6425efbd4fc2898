//! Type-safe SAI object ID wrappers.
//!
//! Object ids are allocated by the switch: the object type code sits in the
//! top 16 bits and a per-switch sequence number fills the rest. The phantom
//! kind parameter keeps ids of different object types from being mixed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw SAI object ID type.
pub type RawSaiObjectId = u64;

const TYPE_SHIFT: u32 = 48;
const SEQ_MASK: u64 = (1 << TYPE_SHIFT) - 1;

/// SAI object types known to the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum ObjectType {
    Port = 1,
    Lag = 2,
    VirtualRouter = 3,
    NextHop = 4,
    NextHopGroup = 5,
    RouterInterface = 6,
    AclTable = 7,
    AclEntry = 8,
    AclCounter = 9,
    AclTableGroup = 11,
    AclTableGroupMember = 12,
    Hostif = 13,
    MirrorSession = 14,
    Stp = 16,
    HostifTrapGroup = 17,
    Policer = 18,
    Wred = 19,
    QosMap = 20,
    Queue = 21,
    Scheduler = 22,
    SchedulerGroup = 23,
    BufferPool = 24,
    BufferProfile = 25,
    IngressPriorityGroup = 26,
    LagMember = 27,
    Hash = 28,
    Switch = 33,
    HostifTrap = 34,
    NeighborEntry = 36,
    RouteEntry = 37,
    Vlan = 38,
    VlanMember = 39,
    Tunnel = 42,
    NextHopGroupMember = 45,
    Bridge = 57,
    BridgePort = 58,
    MyMac = 98,
}

impl ObjectType {
    pub const ALL: &'static [ObjectType] = &[
        ObjectType::Port,
        ObjectType::Lag,
        ObjectType::VirtualRouter,
        ObjectType::NextHop,
        ObjectType::NextHopGroup,
        ObjectType::RouterInterface,
        ObjectType::AclTable,
        ObjectType::AclEntry,
        ObjectType::AclCounter,
        ObjectType::AclTableGroup,
        ObjectType::AclTableGroupMember,
        ObjectType::Hostif,
        ObjectType::MirrorSession,
        ObjectType::Stp,
        ObjectType::HostifTrapGroup,
        ObjectType::Policer,
        ObjectType::Wred,
        ObjectType::QosMap,
        ObjectType::Queue,
        ObjectType::Scheduler,
        ObjectType::SchedulerGroup,
        ObjectType::BufferPool,
        ObjectType::BufferProfile,
        ObjectType::IngressPriorityGroup,
        ObjectType::LagMember,
        ObjectType::Hash,
        ObjectType::Switch,
        ObjectType::HostifTrap,
        ObjectType::NeighborEntry,
        ObjectType::RouteEntry,
        ObjectType::Vlan,
        ObjectType::VlanMember,
        ObjectType::Tunnel,
        ObjectType::NextHopGroupMember,
        ObjectType::Bridge,
        ObjectType::BridgePort,
        ObjectType::MyMac,
    ];

    pub const fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    /// Object type encoded in a raw id.
    pub fn of(raw: RawSaiObjectId) -> Option<Self> {
        Self::from_code((raw >> TYPE_SHIFT) as u16)
    }

    /// Builds a raw id of this type from a sequence number.
    pub const fn oid(&self, seq: u64) -> RawSaiObjectId {
        ((self.code() as u64) << TYPE_SHIFT) | (seq & SEQ_MASK)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Marker trait for SAI object kinds.
pub trait SaiObjectKind: Send + Sync + 'static {
    /// Object type name for debugging.
    fn type_name() -> &'static str;

    fn object_type() -> ObjectType;
}

/// A type-safe SAI object ID.
///
/// # Examples
///
/// ```
/// use vdp_sai::{ObjectType, PortOid};
///
/// let port = PortOid::from_raw(ObjectType::Port.oid(1)).unwrap();
/// assert_eq!(port.to_string(), "0x0001000000000001");
/// assert!(vdp_sai::NextHopOid::checked(port.as_raw()).is_none());
/// ```
pub struct SaiObjectId<T: SaiObjectKind> {
    raw: RawSaiObjectId,
    _marker: PhantomData<T>,
}

impl<T: SaiObjectKind> SaiObjectId<T> {
    /// The null object ID.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Returns `None` for the null id.
    pub fn from_raw(raw: RawSaiObjectId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Like [`from_raw`](Self::from_raw) but also rejects ids whose encoded
    /// object type is not `T`'s.
    pub fn checked(raw: RawSaiObjectId) -> Option<Self> {
        match ObjectType::of(raw) {
            Some(t) if t == T::object_type() => Self::from_raw(raw),
            _ => None,
        }
    }

    pub const fn from_raw_unchecked(raw: RawSaiObjectId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn as_raw(&self) -> RawSaiObjectId {
        self.raw
    }

    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    pub const fn is_valid(&self) -> bool {
        self.raw != 0
    }

    /// Per-switch sequence number.
    pub const fn seq(&self) -> u64 {
        self.raw & SEQ_MASK
    }

    /// Big-endian bytes, the form ids take in packet metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.raw.to_be_bytes().to_vec()
    }
}

impl<T: SaiObjectKind> Clone for SaiObjectId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SaiObjectKind> Copy for SaiObjectId<T> {}

impl<T: SaiObjectKind> fmt::Debug for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:016x})", T::type_name(), self.raw)
    }
}

impl<T: SaiObjectKind> fmt::Display for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.raw)
    }
}

impl<T: SaiObjectKind> PartialEq for SaiObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: SaiObjectKind> Eq for SaiObjectId<T> {}

impl<T: SaiObjectKind> PartialOrd for SaiObjectId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SaiObjectKind> Ord for SaiObjectId<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: SaiObjectKind> Hash for SaiObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: SaiObjectKind> Default for SaiObjectId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $oid_alias:ident, $otype:ident) => {
        #[doc = concat!("Marker type for SAI ", $type_name, " objects.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl SaiObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }

            fn object_type() -> ObjectType {
                ObjectType::$otype
            }
        }

        #[doc = concat!("Object id of a ", $type_name, ".")]
        pub type $oid_alias = SaiObjectId<$name>;
    };
}

define_object_kind!(SwitchKind, "Switch", SwitchOid, Switch);
define_object_kind!(PortKind, "Port", PortOid, Port);
define_object_kind!(LagKind, "Lag", LagOid, Lag);
define_object_kind!(LagMemberKind, "LagMember", LagMemberOid, LagMember);
define_object_kind!(VirtualRouterKind, "VirtualRouter", VirtualRouterOid, VirtualRouter);
define_object_kind!(RouterInterfaceKind, "RouterInterface", RouterInterfaceOid, RouterInterface);
define_object_kind!(NextHopKind, "NextHop", NextHopOid, NextHop);
define_object_kind!(NextHopGroupKind, "NextHopGroup", NextHopGroupOid, NextHopGroup);
define_object_kind!(
    NextHopGroupMemberKind,
    "NextHopGroupMember",
    NextHopGroupMemberOid,
    NextHopGroupMember
);
define_object_kind!(AclTableGroupKind, "AclTableGroup", AclTableGroupOid, AclTableGroup);
define_object_kind!(
    AclTableGroupMemberKind,
    "AclTableGroupMember",
    AclTableGroupMemberOid,
    AclTableGroupMember
);
define_object_kind!(AclTableKind, "AclTable", AclTableOid, AclTable);
define_object_kind!(AclEntryKind, "AclEntry", AclEntryOid, AclEntry);
define_object_kind!(HostifKind, "Hostif", HostifOid, Hostif);
define_object_kind!(HostifTrapKind, "HostifTrap", HostifTrapOid, HostifTrap);
define_object_kind!(HostifTrapGroupKind, "HostifTrapGroup", HostifTrapGroupOid, HostifTrapGroup);
define_object_kind!(MyMacKind, "MyMac", MyMacOid, MyMac);
define_object_kind!(VlanKind, "Vlan", VlanOid, Vlan);
define_object_kind!(BridgeKind, "Bridge", BridgeOid, Bridge);
define_object_kind!(StpKind, "Stp", StpOid, Stp);
define_object_kind!(HashKind, "Hash", HashOid, Hash);
