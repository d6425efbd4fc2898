//! Attribute manager: typed attribute values stored per object id.
//!
//! Every create and set request is flattened into `(attribute id, value)`
//! pairs and stored at the object's id; get requests read them back, falling
//! back to the attribute's documented default. [`sai_attributes!`] declares an
//! attribute enum and binds it to the fields of a request struct.

use crate::error::{SaiError, SaiResult};
use crate::types::{ObjectType, RawSaiObjectId, SaiObjectId, SaiObjectKind};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use vdp_types::{IpAddress, IpPrefix, MacAddress};

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    Mac(MacAddress),
    Ip(IpAddress),
    Prefix(IpPrefix),
    Oid(RawSaiObjectId),
    OidList(Vec<RawSaiObjectId>),
    U32List(Vec<u32>),
    Bytes(Vec<u8>),
    Str(String),
    /// Nested values, e.g. an ACL field's data and mask.
    Struct(Vec<(String, AttrValue)>),
}

impl AttrValue {
    pub fn as_oid(&self) -> Option<RawSaiObjectId> {
        match self {
            AttrValue::Oid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            AttrValue::U8(v) => Some(u64::from(v)),
            AttrValue::U16(v) => Some(u64::from(v)),
            AttrValue::U32(v) => Some(u64::from(v)),
            AttrValue::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::U8(v) => write!(f, "{}", v),
            AttrValue::U16(v) => write!(f, "{}", v),
            AttrValue::U32(v) => write!(f, "{}", v),
            AttrValue::U64(v) => write!(f, "{}", v),
            AttrValue::I32(v) => write!(f, "{}", v),
            AttrValue::Mac(v) => write!(f, "{}", v),
            AttrValue::Ip(v) => write!(f, "{}", v),
            AttrValue::Prefix(v) => write!(f, "{}", v),
            AttrValue::Oid(v) => write!(f, "0x{:016x}", v),
            AttrValue::OidList(v) => {
                let ids: Vec<String> = v.iter().map(|o| format!("0x{:016x}", o)).collect();
                write!(f, "[{}]", ids.join(","))
            }
            AttrValue::U32List(v) => write!(f, "{:?}", v),
            AttrValue::Bytes(v) => write!(f, "{}", v.iter().map(|b| format!("{:02x}", b)).collect::<String>()),
            AttrValue::Str(v) => f.write_str(v),
            AttrValue::Struct(fields) => {
                let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

macro_rules! attr_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for AttrValue {
                fn from(v: $ty) -> Self {
                    AttrValue::$variant(v)
                }
            }
        )*
    };
}

attr_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i32 => I32,
    MacAddress => Mac,
    IpAddress => Ip,
    IpPrefix => Prefix,
    Vec<u32> => U32List,
    Vec<u8> => Bytes,
    String => Str,
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl<T: SaiObjectKind> From<SaiObjectId<T>> for AttrValue {
    fn from(v: SaiObjectId<T>) -> Self {
        AttrValue::Oid(v.as_raw())
    }
}

impl<T: SaiObjectKind> From<Vec<SaiObjectId<T>>> for AttrValue {
    fn from(v: Vec<SaiObjectId<T>>) -> Self {
        AttrValue::OidList(v.iter().map(SaiObjectId::as_raw).collect())
    }
}

/// An attribute enum of one object type.
pub trait SaiAttribute: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const OBJECT_TYPE: ObjectType;
    const ALL: &'static [Self];

    fn id(&self) -> u32;

    fn name(&self) -> &'static str;

    /// Value reported by get when the attribute was never written.
    fn default_value(&self) -> Option<AttrValue>;

    fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.id() == id)
    }
}

/// A request whose fields carry attribute values.
pub trait AttributeRequest {
    /// The set fields as `(attribute id, value)` pairs.
    fn attributes(&self) -> Vec<(u32, AttrValue)>;
}

/// Declares an attribute enum and binds it to a request struct.
///
/// Each line names the variant, its numeric attribute id and its SAI name,
/// optionally the request field (an `Option<T>` with `AttrValue: From<T>`)
/// that carries it, and optionally a default reported by get.
#[macro_export]
macro_rules! sai_attributes {
    (@default) => {
        None
    };
    (@default $def:expr) => {
        Some($crate::attr::AttrValue::from($def))
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $otype:ident for $req:ty {
            $(
                $variant:ident = $id:literal, $sname:literal $(=> $field:ident)? $(, default $def:expr)?;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $crate::attr::SaiAttribute for $name {
            const OBJECT_TYPE: $crate::types::ObjectType = $crate::types::ObjectType::$otype;
            const ALL: &'static [Self] = &[$($name::$variant,)*];

            fn id(&self) -> u32 {
                match self {
                    $($name::$variant => $id,)*
                }
            }

            fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $sname,)*
                }
            }

            fn default_value(&self) -> Option<$crate::attr::AttrValue> {
                match self {
                    $($name::$variant => $crate::sai_attributes!(@default $($def)?),)*
                }
            }
        }

        impl $crate::attr::AttributeRequest for $req {
            fn attributes(&self) -> Vec<(u32, $crate::attr::AttrValue)> {
                #[allow(unused_mut)]
                let mut out = Vec::new();
                $($(
                    if let Some(v) = &self.$field {
                        out.push(($id, $crate::attr::AttrValue::from(v.clone())));
                    }
                )?)*
                out
            }
        }
    };
}

/// Per-object attribute maps.
#[derive(Debug, Default)]
pub struct AttributeStore {
    values: DashMap<RawSaiObjectId, BTreeMap<u32, AttrValue>>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `oid` and stores `attrs`, overwriting earlier values.
    pub fn store(&self, oid: RawSaiObjectId, attrs: Vec<(u32, AttrValue)>) {
        self.values.entry(oid).or_default().extend(attrs);
    }

    pub fn set(&self, oid: RawSaiObjectId, id: u32, value: AttrValue) {
        self.values.entry(oid).or_default().insert(id, value);
    }

    pub fn get(&self, oid: RawSaiObjectId, id: u32) -> Option<AttrValue> {
        self.values.get(&oid).and_then(|m| m.get(&id).cloned())
    }

    pub fn contains(&self, oid: RawSaiObjectId) -> bool {
        self.values.contains_key(&oid)
    }

    pub fn remove(&self, oid: RawSaiObjectId) {
        self.values.remove(&oid);
    }

    pub fn attributes(&self, oid: RawSaiObjectId) -> Vec<(u32, AttrValue)> {
        self.values
            .get(&oid)
            .map(|m| m.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Reads `attrs` of `oid`: stored values first, then defaults. Attributes
    /// with neither are left out of the reply.
    pub fn read<A: SaiAttribute>(&self, oid: RawSaiObjectId, attrs: &[A]) -> SaiResult<Vec<(A, AttrValue)>> {
        let map = self
            .values
            .get(&oid)
            .ok_or_else(|| SaiError::not_found(format!("{} 0x{:016x}", A::OBJECT_TYPE, oid)))?;
        Ok(attrs
            .iter()
            .filter_map(|a| {
                map.get(&a.id())
                    .cloned()
                    .or_else(|| a.default_value())
                    .map(|v| (*a, v))
            })
            .collect())
    }

    /// Number of objects with stored attributes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VirtualRouterOid;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct WidgetRequest {
        mac: Option<MacAddress>,
        router: Option<VirtualRouterOid>,
        mtu: Option<u32>,
    }

    sai_attributes! {
        enum WidgetAttr: Port for WidgetRequest {
            Mac = 1, "SAI_WIDGET_ATTR_MAC" => mac;
            Router = 2, "SAI_WIDGET_ATTR_ROUTER" => router;
            Mtu = 3, "SAI_WIDGET_ATTR_MTU" => mtu, default 1514u32;
            Status = 4, "SAI_WIDGET_ATTR_STATUS";
        }
    }

    #[test]
    fn test_request_fields_become_attributes() {
        let req = WidgetRequest {
            mac: Some("02:00:00:00:00:01".parse().unwrap()),
            router: VirtualRouterOid::from_raw(ObjectType::VirtualRouter.oid(1)),
            mtu: None,
        };
        let attrs = req.attributes();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].0, 1);
        assert_eq!(attrs[1], (2, AttrValue::Oid(ObjectType::VirtualRouter.oid(1))));
    }

    #[test]
    fn test_read_falls_back_to_defaults() {
        let store = AttributeStore::new();
        store.store(7, WidgetRequest::default().attributes());
        let got = store.read(7, &[WidgetAttr::Mtu, WidgetAttr::Mac, WidgetAttr::Status]).unwrap();
        assert_eq!(got, vec![(WidgetAttr::Mtu, AttrValue::U32(1514))]);

        store.set(7, WidgetAttr::Mtu.id(), AttrValue::U32(9100));
        let got = store.read(7, &[WidgetAttr::Mtu]).unwrap();
        assert_eq!(got, vec![(WidgetAttr::Mtu, AttrValue::U32(9100))]);

        assert!(store.read(8, &[WidgetAttr::Mtu]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_attribute_lookup_by_id() {
        assert_eq!(WidgetAttr::from_id(3), Some(WidgetAttr::Mtu));
        assert_eq!(WidgetAttr::Status.name(), "SAI_WIDGET_ATTR_STATUS");
        assert_eq!(WidgetAttr::OBJECT_TYPE, ObjectType::Port);
    }
}
