//! Object identity and reference counting.

use crate::context::Context;
use crate::counter::{CounterId, Counters};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Numeric object id, unique and monotonic within a context.
pub type Nid = u64;

/// Kind tag of a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ObjectKind {
    Port,
    Table,
    Set,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Port => write!(f, "port"),
            ObjectKind::Table => write!(f, "table"),
            ObjectKind::Set => write!(f, "set"),
        }
    }
}

/// State shared by every registered object.
///
/// The registry holds the first reference. Each [`ObjectRef`] holds one
/// more; cleanup runs when the count reaches zero and never runs twice.
#[derive(Debug)]
pub struct ObjectBase {
    id: String,
    nid: Nid,
    kind: ObjectKind,
    refs: AtomicU64,
    cleaned: AtomicBool,
    counters: Counters,
}

impl ObjectBase {
    pub fn new(id: String, nid: Nid, kind: ObjectKind, counters: &[CounterId]) -> Self {
        Self {
            id,
            nid,
            kind,
            refs: AtomicU64::new(1),
            cleaned: AtomicBool::new(false),
            counters: Counters::new(counters),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn ref_count(&self) -> u64 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) -> u64 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference. Returns the new count, or `None` if the count
    /// was already zero.
    pub(crate) fn release(&self) -> Option<u64> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    /// Claims the right to run cleanup. Only the first caller gets true.
    pub(crate) fn claim_cleanup(&self) -> bool {
        !self.cleaned.swap(true, Ordering::AcqRel)
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::Acquire)
    }
}

/// Implemented by everything the registry stores.
pub trait Object: Send + Sync + 'static {
    fn base(&self) -> &ObjectBase;

    /// Releases resources. Runs at most once, after the object has left
    /// the registry.
    fn cleanup(&self) {}
}

/// A counted handle. Dropping it releases the reference.
pub struct ObjectRef<T: Object> {
    inner: Arc<T>,
    ctx: Weak<Context>,
}

impl<T: Object> ObjectRef<T> {
    pub(crate) fn new(inner: Arc<T>, ctx: Weak<Context>) -> Self {
        Self { inner, ctx }
    }

    pub fn arc(&self) -> &Arc<T> {
        &self.inner
    }
}

impl<T: Object> Deref for ObjectRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Object> Drop for ObjectRef<T> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.upgrade() {
            ctx.release(self.inner.base().nid());
        }
    }
}

impl<T: Object> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.inner.base().id())
            .field("nid", &self.inner.base().nid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_to_zero_then_noop() {
        let base = ObjectBase::new("o".into(), 1, ObjectKind::Set, &[]);
        assert_eq!(base.acquire(), 2);
        assert_eq!(base.release(), Some(1));
        assert_eq!(base.release(), Some(0));
        assert_eq!(base.release(), None);
        assert_eq!(base.ref_count(), 0);
    }

    #[test]
    fn test_cleanup_claimed_once() {
        let base = ObjectBase::new("o".into(), 1, ObjectKind::Table, &[]);
        assert!(base.claim_cleanup());
        assert!(!base.claim_cleanup());
        assert!(base.is_cleaned());
    }
}
