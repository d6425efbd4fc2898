//! The forwarding context: object registry, attributes and shared services.
//!
//! A context owns every object created in it. The registry maps both the
//! string id and the numeric id (NID) to the object; everything else holds
//! ids and takes short-lived handles.

use crate::counter::CounterId;
use crate::error::{FwdError, Result};
use crate::notify::NotifyBus;
use crate::object::{Nid, Object, ObjectBase, ObjectKind, ObjectRef};
use crate::port::{LinkProvider, PacketSink, Port};
use crate::set::FwdSet;
use crate::table::Table;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// A registered object.
#[derive(Clone)]
pub enum FwdObject {
    Port(Arc<Port>),
    Table(Arc<Table>),
    Set(Arc<FwdSet>),
}

impl FwdObject {
    pub fn base(&self) -> &ObjectBase {
        match self {
            FwdObject::Port(p) => p.base(),
            FwdObject::Table(t) => t.base(),
            FwdObject::Set(s) => s.base(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.base().kind()
    }

    fn cleanup(&self) {
        match self {
            FwdObject::Port(p) => p.cleanup(),
            FwdObject::Table(t) => t.cleanup(),
            FwdObject::Set(s) => s.cleanup(),
        }
    }
}

impl std::fmt::Debug for FwdObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}, nid {})", self.kind(), self.base().id(), self.base().nid())
    }
}

#[derive(Default)]
struct Registry {
    by_id: HashMap<String, FwdObject>,
    by_nid: HashMap<Nid, String>,
}

/// A named forwarding context.
pub struct Context {
    name: String,
    registry: RwLock<Registry>,
    next_nid: AtomicU64,
    attributes: DashMap<String, HashMap<String, String>>,
    sink: RwLock<Option<Arc<dyn PacketSink>>>,
    notify: NotifyBus,
    pairs: DashMap<Nid, Nid>,
    links: Arc<dyn LinkProvider>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    me: Weak<Context>,
}

impl Context {
    pub fn new(name: impl Into<String>, links: Arc<dyn LinkProvider>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Context {
            name,
            registry: RwLock::new(Registry::default()),
            next_nid: AtomicU64::new(1),
            attributes: DashMap::new(),
            sink: RwLock::new(None),
            notify: NotifyBus::new(),
            pairs: DashMap::new(),
            links,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn weak(&self) -> Weak<Context> {
        self.me.clone()
    }

    /// Token cancelled when the context stops.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tracker for every worker task spawned on behalf of this context.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn links(&self) -> &Arc<dyn LinkProvider> {
        &self.links
    }

    pub fn notify(&self) -> &NotifyBus {
        &self.notify
    }

    /// Builds the shared state for a new object. The NID is consumed even
    /// if the object is never inserted.
    pub(crate) fn new_base(
        &self,
        id: Option<&str>,
        kind: ObjectKind,
        counters: &[CounterId],
    ) -> Result<ObjectBase> {
        let nid = self.next_nid.fetch_add(1, Ordering::Relaxed);
        let id = match id {
            Some("") => return Err(FwdError::invalid_argument("empty object id")),
            Some(id) => id.to_string(),
            None => format!("{}-{}", kind, nid),
        };
        Ok(ObjectBase::new(id, nid, kind, counters))
    }

    /// Registers an object under its id and NID.
    pub(crate) fn insert(&self, obj: FwdObject) -> Result<()> {
        let mut reg = self.registry.write();
        let id = obj.base().id().to_string();
        if reg.by_id.contains_key(&id) {
            return Err(FwdError::invalid_argument(format!(
                "object {} already exists in {}",
                id, self.name
            )));
        }
        reg.by_nid.insert(obj.base().nid(), id.clone());
        debug!(context = %self.name, id = %id, nid = obj.base().nid(), kind = %obj.kind(), "object created");
        reg.by_id.insert(id, obj);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<FwdObject> {
        self.registry
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| FwdError::not_found(format!("object {} in {}", id, self.name)))
    }

    pub fn get_by_nid(&self, nid: Nid) -> Result<FwdObject> {
        let reg = self.registry.read();
        reg.by_nid
            .get(&nid)
            .and_then(|id| reg.by_id.get(id))
            .cloned()
            .ok_or_else(|| FwdError::not_found(format!("nid {} in {}", nid, self.name)))
    }

    pub fn nid(&self, id: &str) -> Result<Nid> {
        self.get(id).map(|o| o.base().nid())
    }

    pub fn port(&self, id: &str) -> Result<Arc<Port>> {
        match self.get(id)? {
            FwdObject::Port(p) => Ok(p),
            other => Err(FwdError::invalid_argument(format!("{} is a {}, not a port", id, other.kind()))),
        }
    }

    pub fn port_by_nid(&self, nid: Nid) -> Result<Arc<Port>> {
        match self.get_by_nid(nid)? {
            FwdObject::Port(p) => Ok(p),
            other => Err(FwdError::invalid_argument(format!(
                "nid {} is a {}, not a port",
                nid,
                other.kind()
            ))),
        }
    }

    pub fn table(&self, id: &str) -> Result<Arc<Table>> {
        match self.get(id)? {
            FwdObject::Table(t) => Ok(t),
            other => Err(FwdError::invalid_argument(format!("{} is a {}, not a table", id, other.kind()))),
        }
    }

    pub fn set(&self, id: &str) -> Result<Arc<FwdSet>> {
        match self.get(id)? {
            FwdObject::Set(s) => Ok(s),
            other => Err(FwdError::invalid_argument(format!("{} is a {}, not a set", id, other.kind()))),
        }
    }

    /// Takes a counted reference to a set.
    pub fn acquire_set(&self, id: &str) -> Result<ObjectRef<FwdSet>> {
        let set = self.set(id)?;
        set.base().acquire();
        Ok(ObjectRef::new(set, self.weak()))
    }

    /// Drops one reference to the object with `nid`. Reaching zero removes
    /// it from the registry and runs its cleanup; releasing an object that
    /// is already at zero does nothing.
    pub fn release(&self, nid: Nid) {
        let Ok(obj) = self.get_by_nid(nid) else {
            return;
        };
        match obj.base().release() {
            Some(0) => self.finish(obj),
            Some(_) => {}
            None => debug!(context = %self.name, nid, "release on zero refcount ignored"),
        }
    }

    fn finish(&self, obj: FwdObject) {
        if !obj.base().claim_cleanup() {
            return;
        }
        {
            let mut reg = self.registry.write();
            reg.by_id.remove(obj.base().id());
            reg.by_nid.remove(&obj.base().nid());
        }
        let nid = obj.base().nid();
        self.pairs.retain(|k, v| *k != nid && *v != nid);
        self.attributes.remove(obj.base().id());
        obj.cleanup();
        debug!(context = %self.name, id = %obj.base().id(), nid, "object removed");
    }

    /// Deletes an object on behalf of the control plane. Objects still
    /// referenced by other objects cannot be deleted.
    pub fn delete(&self, id: &str) -> Result<()> {
        let obj = self.get(id)?;
        let refs = obj.base().ref_count();
        if refs > 1 {
            return Err(FwdError::failed_precondition(format!(
                "{} is still referenced {} times",
                id,
                refs - 1
            )));
        }
        self.release(obj.base().nid());
        Ok(())
    }

    /// Every live object, ordered by NID.
    pub fn objects(&self) -> Vec<FwdObject> {
        let mut objs: Vec<_> = self.registry.read().by_id.values().cloned().collect();
        objs.sort_by_key(|o| o.base().nid());
        objs
    }

    pub fn set_attribute(&self, object: &str, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .entry(object.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn attributes(&self, object: &str) -> HashMap<String, String> {
        self.attributes
            .get(object)
            .map(|a| a.value().clone())
            .unwrap_or_default()
    }

    /// Attributes seen by a packet entering on `port`: the context's own
    /// attributes overlaid with the port's.
    pub fn packet_attributes(&self, port: &str) -> HashMap<String, String> {
        let mut attrs = self.attributes(&self.name);
        attrs.extend(self.attributes(port));
        attrs
    }

    pub fn set_sink(&self, sink: Arc<dyn PacketSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.write() = None;
    }

    pub fn sink(&self) -> Option<Arc<dyn PacketSink>> {
        self.sink.read().clone()
    }

    /// Pairs an external port with its internal companion, both ways.
    pub fn pair_ports(&self, external: Nid, internal: Nid) {
        self.pairs.insert(external, internal);
        self.pairs.insert(internal, external);
    }

    pub fn paired(&self, nid: Nid) -> Option<Nid> {
        self.pairs.get(&nid).map(|p| *p)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops every worker and forces cleanup of every object. Stopping an
    /// already stopped context does nothing.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.tasks.close();
        let objs: Vec<FwdObject> = {
            let mut reg = self.registry.write();
            reg.by_nid.clear();
            reg.by_id.drain().map(|(_, o)| o).collect()
        };
        for obj in objs {
            if obj.base().claim_cleanup() {
                obj.cleanup();
            }
        }
        self.pairs.clear();
        self.clear_sink();
        info!(context = %self.name, "context stopped");
    }

    /// Waits for every worker task to finish after [`Context::stop`].
    pub async fn wait(&self) {
        if !self.tasks.is_closed() {
            warn!(context = %self.name, "waiting on a context that was not stopped");
        }
        self.tasks.wait().await;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("objects", &self.registry.read().by_id.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::LoopbackLinks;

    fn ctx() -> Arc<Context> {
        Context::new("test", Arc::new(LoopbackLinks::new()))
    }

    fn add_set(ctx: &Context, id: Option<&str>) -> Arc<FwdSet> {
        let base = ctx.new_base(id, ObjectKind::Set, &[]).unwrap();
        let set = Arc::new(FwdSet::new(base, vec![]));
        ctx.insert(FwdObject::Set(set.clone())).unwrap();
        set
    }

    #[test]
    fn test_lookup_by_id_and_nid() {
        let ctx = ctx();
        let a = add_set(&ctx, Some("a"));
        let b = add_set(&ctx, None);
        assert!(b.base().nid() > a.base().nid());
        assert_eq!(ctx.nid("a").unwrap(), a.base().nid());
        assert_eq!(ctx.get_by_nid(b.base().nid()).unwrap().base().id(), b.base().id());
        assert!(ctx.get("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let ctx = ctx();
        add_set(&ctx, Some("a"));
        let base = ctx.new_base(Some("a"), ObjectKind::Set, &[]).unwrap();
        let dup = Arc::new(FwdSet::new(base, vec![]));
        assert!(matches!(
            ctx.insert(FwdObject::Set(dup)),
            Err(FwdError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_referenced_object_cannot_be_deleted() {
        let ctx = ctx();
        add_set(&ctx, Some("s"));
        let handle = ctx.acquire_set("s").unwrap();
        assert!(matches!(ctx.delete("s"), Err(FwdError::FailedPrecondition(_))));
        drop(handle);
        ctx.delete("s").unwrap();
        assert!(ctx.get("s").is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let ctx = ctx();
        let s = add_set(&ctx, Some("s"));
        let nid = s.base().nid();
        ctx.release(nid);
        assert!(s.base().is_cleaned());
        ctx.release(nid);
        assert_eq!(s.base().ref_count(), 0);
    }

    #[test]
    fn test_stop_twice() {
        let ctx = ctx();
        let s = add_set(&ctx, Some("s"));
        ctx.stop();
        ctx.stop();
        assert!(s.base().is_cleaned());
        assert!(ctx.objects().is_empty());
    }

    #[test]
    fn test_packet_attributes_overlay() {
        let ctx = ctx();
        ctx.set_attribute("test", "trace", "false");
        ctx.set_attribute("p1", "trace", "true");
        assert_eq!(ctx.packet_attributes("p1")["trace"], "true");
        assert_eq!(ctx.packet_attributes("p2")["trace"], "false");
    }
}
