//! Forwarding tables.
//!
//! Every table maps a packet to an action list. A miss yields the table's
//! default actions. Three bodies exist:
//!
//! - exact: equality on a fixed, ordered list of fields
//! - prefix: longest combined mask wins, older entries win ties
//! - flow: TCAM-style banks of priority levels with masked keys and set
//!   qualifiers

mod exact;
mod flow;
mod prefix;

use crate::action::{Action, Verdict};
use crate::context::Context;
use crate::counter::CounterId;
use crate::error::{FwdError, Result};
use crate::field::FieldId;
use crate::object::{Object, ObjectBase};
use crate::packet::Packet;
use exact::ExactTable;
use flow::FlowTable;
use parking_lot::RwLock;
use prefix::PrefixTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use vdp_types::bytes::{pad_left, prefix_mask};

/// Table body kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Exact,
    Prefix,
    Flow,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Exact => write!(f, "exact"),
            TableKind::Prefix => write!(f, "prefix"),
            TableKind::Flow => write!(f, "flow"),
        }
    }
}

impl FromStr for TableKind {
    type Err = FwdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(TableKind::Exact),
            "prefix" => Ok(TableKind::Prefix),
            "flow" => Ok(TableKind::Flow),
            _ => Err(FwdError::invalid_argument(format!("unknown table kind {}", s))),
        }
    }
}

/// Table creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDesc {
    pub id: Option<String>,
    pub kind: TableKind,
    /// Key fields for exact and prefix tables, in key order.
    pub keys: Vec<FieldId>,
    /// Number of banks of a flow table.
    pub banks: usize,
    pub default_actions: Vec<Action>,
}

impl TableDesc {
    pub fn exact(id: impl Into<String>, keys: Vec<FieldId>) -> Self {
        Self {
            id: Some(id.into()),
            kind: TableKind::Exact,
            keys,
            banks: 0,
            default_actions: Vec::new(),
        }
    }

    pub fn prefix(id: impl Into<String>, keys: Vec<FieldId>) -> Self {
        Self {
            id: Some(id.into()),
            kind: TableKind::Prefix,
            keys,
            banks: 0,
            default_actions: Vec::new(),
        }
    }

    pub fn flow(id: impl Into<String>, banks: usize) -> Self {
        Self {
            id: Some(id.into()),
            kind: TableKind::Flow,
            keys: Vec::new(),
            banks,
            default_actions: Vec::new(),
        }
    }

    pub fn with_default(mut self, actions: Vec<Action>) -> Self {
        self.default_actions = actions;
        self
    }
}

/// One key of an entry. A missing mask means every bit counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub field: FieldId,
    pub value: Vec<u8>,
    pub mask: Option<Vec<u8>>,
}

impl EntryKey {
    pub fn new(field: impl Into<FieldId>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            mask: None,
        }
    }

    pub fn masked(field: impl Into<FieldId>, value: impl Into<Vec<u8>>, mask: impl Into<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            mask: Some(mask.into()),
        }
    }

    /// A prefix of `len` bits over `value`'s own width (4 bytes for an
    /// IPv4 address, 16 for IPv6).
    pub fn prefix(field: impl Into<FieldId>, value: impl Into<Vec<u8>>, len: usize) -> Self {
        let value = value.into();
        let mask = prefix_mask(value.len(), len);
        Self {
            field: field.into(),
            value,
            mask: Some(mask),
        }
    }

    /// Canonical (value & mask, mask) pair.
    pub(crate) fn canonical(&self) -> (Vec<u8>, Vec<u8>) {
        let size = self.field.size();
        let mask = match &self.mask {
            Some(m) => pad_left(m, size),
            None => vec![0xff; size],
        };
        let value = pad_left(&self.value, size)
            .iter()
            .zip(&mask)
            .map(|(v, m)| v & m)
            .collect();
        (value, mask)
    }
}

/// A set-membership qualifier on a flow entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qualifier {
    pub field: FieldId,
    pub set: String,
}

/// Table entry descriptor. `bank` and `priority` only apply to flow
/// tables; a lower priority value matches first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryDesc {
    pub keys: Vec<EntryKey>,
    pub qualifiers: Vec<Qualifier>,
    pub bank: usize,
    pub priority: u32,
}

impl EntryDesc {
    pub fn new(keys: Vec<EntryKey>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }

    pub fn flow(bank: usize, priority: u32, keys: Vec<EntryKey>) -> Self {
        Self {
            keys,
            qualifiers: Vec::new(),
            bank,
            priority,
        }
    }

    pub fn with_qualifier(mut self, field: impl Into<FieldId>, set: impl Into<String>) -> Self {
        self.qualifiers.push(Qualifier {
            field: field.into(),
            set: set.into(),
        });
        self
    }
}

enum TableBody {
    Exact(ExactTable),
    Prefix(PrefixTable),
    Flow(FlowTable),
}

/// A forwarding table object.
pub struct Table {
    base: ObjectBase,
    kind: TableKind,
    defaults: RwLock<Arc<[Action]>>,
    body: TableBody,
}

impl Table {
    pub(crate) fn new(base: ObjectBase, desc: &TableDesc) -> Result<Self> {
        let body = match desc.kind {
            TableKind::Exact => TableBody::Exact(ExactTable::new(desc.keys.clone())),
            TableKind::Prefix => {
                if desc.keys.is_empty() {
                    return Err(FwdError::invalid_argument("prefix table needs key fields"));
                }
                TableBody::Prefix(PrefixTable::new(desc.keys.clone()))
            }
            TableKind::Flow => {
                if desc.banks == 0 {
                    return Err(FwdError::invalid_argument("flow table needs at least one bank"));
                }
                TableBody::Flow(FlowTable::new(desc.banks))
            }
        };
        Ok(Self {
            base,
            kind: desc.kind,
            defaults: RwLock::new(desc.default_actions.clone().into()),
            body,
        })
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    pub fn nid(&self) -> u64 {
        self.base.nid()
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn default_actions(&self) -> Arc<[Action]> {
        self.defaults.read().clone()
    }

    pub fn set_default(&self, actions: Vec<Action>) {
        *self.defaults.write() = actions.into();
    }

    /// Matches `pkt` and returns the actions to run. The verdict of a table
    /// lookup itself is always [`Verdict::Continue`].
    pub fn process(&self, pkt: &mut Packet) -> (Arc<[Action]>, Verdict) {
        let hit = match &self.body {
            TableBody::Exact(t) => t.lookup(pkt),
            TableBody::Prefix(t) => t.lookup(pkt),
            TableBody::Flow(t) => t.lookup(pkt),
        };
        let len = pkt.length();
        match hit {
            Some(actions) => {
                self.base.counters().increment(CounterId::TableHit, len);
                pkt.log(|| format!("{}: hit", self.id()));
                (actions, Verdict::Continue)
            }
            None => {
                self.base.counters().increment(CounterId::TableMiss, len);
                pkt.log(|| format!("{}: miss", self.id()));
                (self.default_actions(), Verdict::Continue)
            }
        }
    }

    /// Adds an entry, replacing the actions of an identical one.
    pub fn add_entry(&self, ctx: &Context, entry: EntryDesc, actions: Vec<Action>) -> Result<()> {
        let actions: Arc<[Action]> = actions.into();
        match &self.body {
            TableBody::Exact(t) => t.add(&entry, actions),
            TableBody::Prefix(t) => t.add(&entry, actions),
            TableBody::Flow(t) => t.add(ctx, entry, actions),
        }
    }

    pub fn remove_entry(&self, entry: &EntryDesc) -> Result<()> {
        match &self.body {
            TableBody::Exact(t) => t.remove(entry),
            TableBody::Prefix(t) => t.remove(entry),
            TableBody::Flow(t) => t.remove(entry),
        }
        .map_err(|e| match e {
            FwdError::NotFound(m) => FwdError::NotFound(format!("{} in table {}", m, self.id())),
            e => e,
        })
    }

    /// Every entry with its actions.
    pub fn entries(&self) -> Vec<(EntryDesc, Arc<[Action]>)> {
        match &self.body {
            TableBody::Exact(t) => t.entries(),
            TableBody::Prefix(t) => t.entries(),
            TableBody::Flow(t) => t.entries(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.body {
            TableBody::Exact(t) => t.len(),
            TableBody::Prefix(t) => t.len(),
            TableBody::Flow(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Object for Table {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn cleanup(&self) {
        match &self.body {
            TableBody::Exact(t) => t.clear(),
            TableBody::Prefix(t) => t.clear(),
            TableBody::Flow(t) => t.clear(),
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("entries", &self.len())
            .finish()
    }
}

/// Concatenated canonical values of `fields`, or `None` if any is absent.
pub(crate) fn packet_key(pkt: &Packet, fields: &[FieldId]) -> Option<Vec<u8>> {
    let mut key = Vec::with_capacity(fields.iter().map(FieldId::size).sum());
    for f in fields {
        key.extend_from_slice(&pkt.field(f).ok()?);
    }
    Some(key)
}

/// Splits a concatenated key back into per-field values.
pub(crate) fn split_key(fields: &[FieldId], key: &[u8]) -> Vec<(FieldId, Vec<u8>)> {
    let mut out = Vec::with_capacity(fields.len());
    let mut off = 0;
    for f in fields {
        let end = (off + f.size()).min(key.len());
        out.push((*f, key[off..end].to_vec()));
        off = end;
    }
    out
}
