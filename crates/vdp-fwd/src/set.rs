//! Forwarding sets: named byte-string sets used by flow-table qualifiers.

use crate::object::{Object, ObjectBase};
use parking_lot::RwLock;
use std::collections::HashSet;

/// A set of byte strings. Membership is exact byte equality.
#[derive(Debug)]
pub struct FwdSet {
    base: ObjectBase,
    members: RwLock<HashSet<Vec<u8>>>,
}

impl FwdSet {
    pub(crate) fn new(base: ObjectBase, members: Vec<Vec<u8>>) -> Self {
        Self {
            base,
            members: RwLock::new(members.into_iter().collect()),
        }
    }

    /// Replaces the whole membership.
    pub fn update(&self, members: Vec<Vec<u8>>) {
        *self.members.write() = members.into_iter().collect();
    }

    pub fn contains(&self, value: &[u8]) -> bool {
        self.members.read().contains(value)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn members(&self) -> Vec<Vec<u8>> {
        let mut out: Vec<_> = self.members.read().iter().cloned().collect();
        out.sort();
        out
    }
}

impl Object for FwdSet {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn cleanup(&self) {
        self.members.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;

    fn set(members: Vec<Vec<u8>>) -> FwdSet {
        FwdSet::new(ObjectBase::new("s".into(), 1, ObjectKind::Set, &[]), members)
    }

    #[test]
    fn test_contains_is_exact() {
        let s = set(vec![vec![0, 1], vec![2]]);
        assert!(s.contains(&[0, 1]));
        assert!(s.contains(&[2]));
        assert!(!s.contains(&[1]));
        assert!(!s.contains(&[0, 2]));
        assert!(!s.contains(&[0, 0, 1]));
    }

    #[test]
    fn test_update_replaces_membership() {
        let s = set(vec![vec![1]]);
        s.update(vec![vec![2], vec![3]]);
        assert!(!s.contains(&[1]));
        assert_eq!(s.members(), vec![vec![2], vec![3]]);
    }
}
