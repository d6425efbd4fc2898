use super::{EntryDesc, EntryKey, Qualifier};
use crate::action::Action;
use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::field::FieldId;
use crate::object::ObjectRef;
use crate::packet::Packet;
use crate::set::FwdSet;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

struct FlowEntry {
    /// Canonical keys, in the order they were given.
    keys: Vec<EntryKey>,
    qualifiers: Vec<Qualifier>,
    sets: Vec<ObjectRef<FwdSet>>,
    /// Value and mask laid out over the table's field union.
    value: Vec<u8>,
    mask: Vec<u8>,
    actions: Arc<[Action]>,
}

impl FlowEntry {
    fn layout(&mut self, fields: &[FieldId]) {
        self.value.clear();
        self.mask.clear();
        for field in fields {
            match self.keys.iter().find(|k| k.field == *field) {
                Some(k) => {
                    let (v, m) = k.canonical();
                    self.value.extend_from_slice(&v);
                    self.mask.extend_from_slice(&m);
                }
                None => {
                    self.value.resize(self.value.len() + field.size(), 0);
                    self.mask.resize(self.mask.len() + field.size(), 0);
                }
            }
        }
    }

    fn matches(&self, key: &[u8], pkt: &Packet) -> bool {
        let keyed = key
            .iter()
            .zip(&self.mask)
            .zip(&self.value)
            .all(|((k, m), v)| k & m == *v);
        keyed
            && self
                .qualifiers
                .iter()
                .zip(&self.sets)
                .all(|(q, set)| pkt.field(&q.field).map_or(false, |v| set.contains(&v)))
    }

    fn same(&self, keys: &[EntryKey], qualifiers: &[Qualifier]) -> bool {
        self.keys == keys && self.qualifiers == qualifiers
    }
}

#[derive(Default)]
struct Bank {
    /// Keyed by priority value; the lowest value matches first.
    levels: BTreeMap<u32, Vec<FlowEntry>>,
}

struct FlowState {
    fields: Vec<FieldId>,
    banks: Vec<Bank>,
}

/// Ternary match table with priority banks.
pub(super) struct FlowTable {
    state: RwLock<FlowState>,
}

fn normalize(keys: &[EntryKey]) -> Result<Vec<EntryKey>> {
    let mut out: Vec<EntryKey> = Vec::with_capacity(keys.len());
    for key in keys {
        if out.iter().any(|k| k.field == key.field) {
            return Err(FwdError::invalid_argument(format!("duplicate key field {}", key.field)));
        }
        let (value, mask) = key.canonical();
        out.push(EntryKey::masked(key.field, value, mask));
    }
    Ok(out)
}

impl FlowTable {
    pub(super) fn new(banks: usize) -> Self {
        Self {
            state: RwLock::new(FlowState {
                fields: Vec::new(),
                banks: (0..banks).map(|_| Bank::default()).collect(),
            }),
        }
    }

    pub(super) fn lookup(&self, pkt: &Packet) -> Option<Arc<[Action]>> {
        let state = self.state.read();
        let mut key = Vec::with_capacity(state.fields.iter().map(FieldId::size).sum());
        for field in &state.fields {
            match pkt.field(field) {
                Ok(v) => key.extend_from_slice(&v),
                Err(_) => key.resize(key.len() + field.size(), 0),
            }
        }
        state
            .banks
            .iter()
            .flat_map(|bank| bank.levels.values())
            .flatten()
            .find(|entry| entry.matches(&key, pkt))
            .map(|entry| entry.actions.clone())
    }

    pub(super) fn add(&self, ctx: &Context, entry: EntryDesc, actions: Arc<[Action]>) -> Result<()> {
        let keys = normalize(&entry.keys)?;
        // Sets are acquired before taking the table lock; releasing one may
        // run cleanup through the context.
        let sets = entry
            .qualifiers
            .iter()
            .map(|q| ctx.acquire_set(&q.set))
            .collect::<Result<Vec<_>>>()?;
        let mut stale = Vec::new();
        {
            let mut state = self.state.write();
            let FlowState { fields, banks } = &mut *state;
            if entry.bank >= banks.len() {
                return Err(FwdError::invalid_argument(format!(
                    "bank {} out of range (0..{})",
                    entry.bank,
                    banks.len()
                )));
            }

            let mut grown = false;
            for key in &keys {
                if !fields.contains(&key.field) {
                    fields.push(key.field);
                    grown = true;
                }
            }
            if grown {
                for e in bank_entries_mut(banks) {
                    e.layout(fields);
                }
            }

            let bank = &mut banks[entry.bank];
            let level = bank.levels.entry(entry.priority).or_default();
            match level.iter_mut().find(|e| e.same(&keys, &entry.qualifiers)) {
                Some(existing) => {
                    existing.actions = actions;
                    stale = sets;
                }
                None => {
                    let mut e = FlowEntry {
                        keys,
                        qualifiers: entry.qualifiers,
                        sets,
                        value: Vec::new(),
                        mask: Vec::new(),
                        actions,
                    };
                    e.layout(fields);
                    level.push(e);
                }
            }
        }
        drop(stale);
        Ok(())
    }

    pub(super) fn remove(&self, entry: &EntryDesc) -> Result<()> {
        let keys = normalize(&entry.keys)?;
        let removed = {
            let mut state = self.state.write();
            let bank = state
                .banks
                .get_mut(entry.bank)
                .ok_or_else(|| FwdError::invalid_argument(format!("bank {} out of range", entry.bank)))?;
            let level = bank
                .levels
                .get_mut(&entry.priority)
                .ok_or_else(|| FwdError::not_found("flow entry"))?;
            let idx = level
                .iter()
                .position(|e| e.same(&keys, &entry.qualifiers))
                .ok_or_else(|| FwdError::not_found("flow entry"))?;
            let removed = level.remove(idx);
            if level.is_empty() {
                bank.levels.remove(&entry.priority);
            }
            removed
        };
        drop(removed);
        Ok(())
    }

    pub(super) fn entries(&self) -> Vec<(EntryDesc, Arc<[Action]>)> {
        let state = self.state.read();
        let mut out = Vec::new();
        for (bank, b) in state.banks.iter().enumerate() {
            for (priority, level) in &b.levels {
                for e in level {
                    let desc = EntryDesc {
                        keys: e.keys.clone(),
                        qualifiers: e.qualifiers.clone(),
                        bank,
                        priority: *priority,
                    };
                    out.push((desc, e.actions.clone()));
                }
            }
        }
        out
    }

    pub(super) fn len(&self) -> usize {
        let state = self.state.read();
        state
            .banks
            .iter()
            .flat_map(|b| b.levels.values())
            .map(Vec::len)
            .sum()
    }

    pub(super) fn clear(&self) {
        let banks: Vec<Bank> = {
            let mut state = self.state.write();
            let n = state.banks.len();
            state.fields.clear();
            std::mem::replace(&mut state.banks, (0..n).map(|_| Bank::default()).collect())
        };
        drop(banks);
    }
}

fn bank_entries_mut(banks: &mut [Bank]) -> impl Iterator<Item = &mut FlowEntry> {
    banks
        .iter_mut()
        .flat_map(|b| b.levels.values_mut())
        .flat_map(|level| level.iter_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FwdObject;
    use crate::field::FieldNum;
    use crate::object::{Object, ObjectKind};
    use crate::packet::tests::udp4_frame;
    use crate::packet::HeaderId;
    use crate::port::LoopbackLinks;

    fn ctx() -> Arc<Context> {
        Context::new("flow", Arc::new(LoopbackLinks::new()))
    }

    fn packet() -> Packet {
        Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap()
    }

    fn transmit(port: &str) -> Arc<[Action]> {
        vec![Action::transmit(port)].into()
    }

    fn proto(bank: usize, priority: u32, value: u8) -> EntryDesc {
        EntryDesc::flow(bank, priority, vec![EntryKey::new(FieldNum::IpProto, vec![value])])
    }

    #[test]
    fn test_lower_priority_value_wins() {
        let ctx = ctx();
        let t = FlowTable::new(1);
        t.add(&ctx, proto(0, 10, 17), transmit("p10")).unwrap();
        t.add(&ctx, proto(0, 5, 17), transmit("p5")).unwrap();
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("p5"));

        t.remove(&proto(0, 5, 17)).unwrap();
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("p10"));
        t.remove(&proto(0, 10, 17)).unwrap();
        assert!(t.lookup(&packet()).is_none());
        assert!(t.remove(&proto(0, 10, 17)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_banks_walked_in_order() {
        let ctx = ctx();
        let t = FlowTable::new(2);
        t.add(&ctx, proto(1, 0, 17), transmit("bank1")).unwrap();
        t.add(&ctx, proto(0, 100, 17), transmit("bank0")).unwrap();
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("bank0"));
        assert!(matches!(
            t.add(&ctx, proto(2, 0, 17), transmit("x")),
            Err(FwdError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_identical_entry_replaces_actions() {
        let ctx = ctx();
        let t = FlowTable::new(1);
        t.add(&ctx, proto(0, 1, 17), transmit("old")).unwrap();
        t.add(&ctx, proto(0, 1, 17), transmit("new")).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("new"));
    }

    #[test]
    fn test_new_field_rebuilds_layout() {
        let ctx = ctx();
        let t = FlowTable::new(1);
        t.add(&ctx, proto(0, 5, 6), transmit("tcp")).unwrap();
        let by_dst = EntryDesc::flow(
            0,
            10,
            vec![EntryKey::prefix(FieldNum::IpAddrDst, vec![10, 0, 0, 0], 8)],
        );
        t.add(&ctx, by_dst, transmit("ten")).unwrap();
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("ten"));

        t.add(&ctx, proto(0, 1, 17), transmit("udp")).unwrap();
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("udp"));
    }

    #[test]
    fn test_qualifier_uses_set_membership() {
        let ctx = ctx();
        let base = ctx.new_base(Some("dsts"), ObjectKind::Set, &[]).unwrap();
        let set = Arc::new(FwdSet::new(base, vec![]));
        ctx.insert(FwdObject::Set(set.clone())).unwrap();

        let t = FlowTable::new(1);
        let entry = EntryDesc::flow(0, 0, vec![]).with_qualifier(FieldNum::IpAddrDst, "dsts");
        t.add(&ctx, entry.clone(), transmit("member")).unwrap();
        assert_eq!(set.base().ref_count(), 2);
        assert!(t.lookup(&packet()).is_none());

        let mut dst = vec![0u8; 12];
        dst.extend_from_slice(&[10, 0, 0, 2]);
        set.update(vec![dst]);
        assert_eq!(t.lookup(&packet()).unwrap(), transmit("member"));

        t.remove(&entry).unwrap();
        assert_eq!(set.base().ref_count(), 1);
    }

    #[test]
    fn test_missing_set_rejected() {
        let ctx = ctx();
        let t = FlowTable::new(1);
        let entry = EntryDesc::flow(0, 0, vec![]).with_qualifier(FieldNum::IpAddrDst, "nope");
        assert!(t.add(&ctx, entry, transmit("x")).unwrap_err().is_not_found());
        assert_eq!(t.len(), 0);
    }
}
