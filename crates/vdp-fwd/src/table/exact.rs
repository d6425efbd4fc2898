use super::{packet_key, split_key, EntryDesc, EntryKey};
use crate::action::Action;
use crate::error::{FwdError, Result};
use crate::field::FieldId;
use crate::packet::Packet;
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Equality match on the concatenation of the key fields.
pub(super) struct ExactTable {
    fields: Vec<FieldId>,
    entries: RwLock<HashMap<Vec<u8>, Arc<[Action]>, RandomState>>,
}

impl ExactTable {
    pub(super) fn new(fields: Vec<FieldId>) -> Self {
        Self {
            fields,
            entries: RwLock::new(HashMap::default()),
        }
    }

    /// Orders the entry's keys by the table's fields and concatenates them.
    fn entry_key(&self, entry: &EntryDesc) -> Result<Vec<u8>> {
        if entry.keys.len() != self.fields.len() {
            return Err(FwdError::invalid_argument(format!(
                "exact entry has {} keys, table has {}",
                entry.keys.len(),
                self.fields.len()
            )));
        }
        let mut key = Vec::new();
        for field in &self.fields {
            let k = entry
                .keys
                .iter()
                .find(|k| k.field == *field)
                .ok_or_else(|| FwdError::invalid_argument(format!("exact entry lacks {}", field)))?;
            if k.mask.is_some() {
                return Err(FwdError::invalid_argument(format!(
                    "exact entry key {} cannot be masked",
                    field
                )));
            }
            key.extend_from_slice(&k.canonical().0);
        }
        Ok(key)
    }

    pub(super) fn lookup(&self, pkt: &Packet) -> Option<Arc<[Action]>> {
        let key = packet_key(pkt, &self.fields)?;
        self.entries.read().get(&key).cloned()
    }

    pub(super) fn add(&self, entry: &EntryDesc, actions: Arc<[Action]>) -> Result<()> {
        let key = self.entry_key(entry)?;
        self.entries.write().insert(key, actions);
        Ok(())
    }

    pub(super) fn remove(&self, entry: &EntryDesc) -> Result<()> {
        let key = self.entry_key(entry)?;
        self.entries
            .write()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| FwdError::not_found("exact entry"))
    }

    pub(super) fn entries(&self) -> Vec<(EntryDesc, Arc<[Action]>)> {
        self.entries
            .read()
            .iter()
            .map(|(key, actions)| {
                let keys = split_key(&self.fields, key)
                    .into_iter()
                    .map(|(f, v)| EntryKey::new(f, v))
                    .collect();
                (EntryDesc::new(keys), actions.clone())
            })
            .collect()
    }

    pub(super) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(super) fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldNum;
    use crate::packet::tests::udp4_frame;
    use crate::packet::HeaderId;

    fn table() -> ExactTable {
        ExactTable::new(vec![FieldNum::IpVersion.into(), FieldNum::IpProto.into()])
    }

    #[test]
    fn test_hit_with_short_values() {
        let t = table();
        let entry = EntryDesc::new(vec![
            EntryKey::new(FieldNum::IpProto, vec![17]),
            EntryKey::new(FieldNum::IpVersion, vec![4]),
        ]);
        t.add(&entry, vec![Action::Drop].into()).unwrap();
        let pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert_eq!(&*t.lookup(&pkt).unwrap(), &[Action::Drop]);
    }

    #[test]
    fn test_absent_field_misses() {
        let t = ExactTable::new(vec![FieldNum::TcpFlags.into()]);
        t.add(&EntryDesc::new(vec![EntryKey::new(FieldNum::TcpFlags, vec![0])]), Vec::<Action>::new().into())
            .unwrap();
        let pkt = Packet::parse(HeaderId::Ethernet, &udp4_frame()).unwrap();
        assert!(t.lookup(&pkt).is_none());
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let t = table();
        let entry = EntryDesc::new(vec![EntryKey::new(FieldNum::IpProto, vec![17])]);
        assert!(t.add(&entry, Vec::<Action>::new().into()).is_err());
        assert!(t.remove(&entry).is_err());
    }

    #[test]
    fn test_remove_and_list() {
        let t = table();
        let entry = EntryDesc::new(vec![
            EntryKey::new(FieldNum::IpVersion, vec![6]),
            EntryKey::new(FieldNum::IpProto, vec![58]),
        ]);
        t.add(&entry, vec![Action::Continue].into()).unwrap();
        assert_eq!(t.entries()[0].0, entry);
        t.remove(&entry).unwrap();
        assert_eq!(t.len(), 0);
        assert!(t.remove(&entry).unwrap_err().is_not_found());
    }
}
