use super::{packet_key, split_key, EntryDesc, EntryKey};
use crate::action::Action;
use crate::error::{FwdError, Result};
use crate::field::FieldId;
use crate::packet::Packet;
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use vdp_types::bytes::apply_mask;

struct MaskGroup {
    mask: Vec<u8>,
    bits: u32,
    /// Masked key to (actions, insertion sequence).
    entries: HashMap<Vec<u8>, (Arc<[Action]>, u64), RandomState>,
}

#[derive(Default)]
struct PrefixState {
    /// Sorted by descending mask length.
    groups: Vec<MaskGroup>,
    seq: u64,
}

/// Longest-prefix match over one or more fields, bucketed by mask.
pub(super) struct PrefixTable {
    fields: Vec<FieldId>,
    state: RwLock<PrefixState>,
}

impl PrefixTable {
    pub(super) fn new(fields: Vec<FieldId>) -> Self {
        Self {
            fields,
            state: RwLock::new(PrefixState::default()),
        }
    }

    /// Concatenated (masked value, mask) in table field order.
    fn entry_key(&self, entry: &EntryDesc) -> Result<(Vec<u8>, Vec<u8>)> {
        if entry.keys.len() != self.fields.len() {
            return Err(FwdError::invalid_argument(format!(
                "prefix entry has {} keys, table has {}",
                entry.keys.len(),
                self.fields.len()
            )));
        }
        let mut value = Vec::new();
        let mut mask = Vec::new();
        for field in &self.fields {
            let k = entry
                .keys
                .iter()
                .find(|k| k.field == *field)
                .ok_or_else(|| FwdError::invalid_argument(format!("prefix entry lacks {}", field)))?;
            let (v, m) = k.canonical();
            value.extend_from_slice(&v);
            mask.extend_from_slice(&m);
        }
        Ok((value, mask))
    }

    pub(super) fn lookup(&self, pkt: &Packet) -> Option<Arc<[Action]>> {
        let key = packet_key(pkt, &self.fields)?;
        let state = self.state.read();
        let mut best: Option<(u32, u64, &Arc<[Action]>)> = None;
        for group in &state.groups {
            if let Some((bits, _, _)) = best {
                if group.bits < bits {
                    break;
                }
            }
            if let Some((actions, seq)) = group.entries.get(&apply_mask(&key, &group.mask)) {
                let better = match best {
                    Some((_, best_seq, _)) => *seq < best_seq,
                    None => true,
                };
                if better {
                    best = Some((group.bits, *seq, actions));
                }
            }
        }
        best.map(|(_, _, actions)| actions.clone())
    }

    pub(super) fn add(&self, entry: &EntryDesc, actions: Arc<[Action]>) -> Result<()> {
        let (value, mask) = self.entry_key(entry)?;
        let mut state = self.state.write();
        state.seq += 1;
        let seq = state.seq;
        let idx = match state.groups.iter().position(|g| g.mask == mask) {
            Some(i) => i,
            None => {
                let bits = mask.iter().map(|b| b.count_ones()).sum();
                state.groups.push(MaskGroup {
                    mask: mask.clone(),
                    bits,
                    entries: HashMap::default(),
                });
                state.groups.sort_by(|a, b| b.bits.cmp(&a.bits));
                state
                    .groups
                    .iter()
                    .position(|g| g.mask == mask)
                    .ok_or_else(|| FwdError::internal("prefix group vanished"))?
            }
        };
        let group = &mut state.groups[idx];
        match group.entries.get_mut(&value) {
            // Re-adding keeps the original age.
            Some(existing) => existing.0 = actions,
            None => {
                group.entries.insert(value, (actions, seq));
            }
        }
        Ok(())
    }

    pub(super) fn remove(&self, entry: &EntryDesc) -> Result<()> {
        let (value, mask) = self.entry_key(entry)?;
        let mut state = self.state.write();
        let idx = state
            .groups
            .iter()
            .position(|g| g.mask == mask)
            .ok_or_else(|| FwdError::not_found("prefix entry"))?;
        state.groups[idx]
            .entries
            .remove(&value)
            .ok_or_else(|| FwdError::not_found("prefix entry"))?;
        if state.groups[idx].entries.is_empty() {
            state.groups.remove(idx);
        }
        Ok(())
    }

    pub(super) fn entries(&self) -> Vec<(EntryDesc, Arc<[Action]>)> {
        let state = self.state.read();
        let mut out: Vec<(u64, EntryDesc, Arc<[Action]>)> = Vec::new();
        for group in &state.groups {
            let masks = split_key(&self.fields, &group.mask);
            for (value, (actions, seq)) in &group.entries {
                let keys = split_key(&self.fields, value)
                    .into_iter()
                    .zip(&masks)
                    .map(|((f, v), (_, m))| EntryKey::masked(f, v, m.clone()))
                    .collect();
                out.push((*seq, EntryDesc::new(keys), actions.clone()));
            }
        }
        out.sort_by_key(|(seq, _, _)| *seq);
        out.into_iter().map(|(_, e, a)| (e, a)).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.state.read().groups.iter().map(|g| g.entries.len()).sum()
    }

    pub(super) fn clear(&self) {
        self.state.write().groups.clear();
    }
}
