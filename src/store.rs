//! The authoritative committed object table.
//!
//! Objects are grouped per type into a live collection (mutated only by the
//! commit path) plus an iteration snapshot: an immutable, lock-free view
//! rebuilt at each commit boundary. Queries that touch a single collection
//! iterate the snapshot without locking; the snapshot may be transactionally
//! stale relative to concurrent commits but never exposes a torn object.

use crate::error::DirDbError;
use crate::invid::{Invid, ObjectTypeId};
use crate::object::ObjectRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub type SessionId = u64;

/// Object lookup seam used by matching and permission evaluation. The store
/// itself resolves committed state only; sessions layer their transaction
/// working set on top.
pub trait ObjectResolver {
    fn resolve(&self, invid: Invid) -> Option<Arc<ObjectRecord>>;

    /// Label lookup for invid-to-string comparisons.
    fn label_of(&self, invid: Invid) -> Option<String> {
        self.resolve(invid).map(|obj| obj.label().to_string())
    }
}

impl ObjectResolver for ObjectStore {
    fn resolve(&self, invid: Invid) -> Option<Arc<ObjectRecord>> {
        self.view(invid)
    }
}

#[derive(Debug, Default)]
struct TypeCollection {
    live: HashMap<u32, Arc<ObjectRecord>>,
    iteration: Arc<Vec<Arc<ObjectRecord>>>,
    next_num: u32,
}

impl TypeCollection {
    fn refresh_iteration(&mut self) {
        let mut objects: Vec<Arc<ObjectRecord>> = self.live.values().cloned().collect();
        objects.sort_by_key(|obj| obj.invid());
        self.iteration = Arc::new(objects);
    }
}

/// A single object mutation applied at commit.
#[derive(Debug, Clone)]
pub enum CommitOp {
    Put(Arc<ObjectRecord>),
    Remove(Invid),
}

#[derive(Debug, Default)]
pub struct ObjectStore {
    collections: RwLock<HashMap<ObjectTypeId, TypeCollection>>,
    /// Exclusive-checkout table: at most one shadow may exist per base
    /// object across all sessions.
    checkouts: Mutex<HashMap<Invid, SessionId>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_collection(&self, type_id: ObjectTypeId) {
        self.collections.write().entry(type_id).or_default();
    }

    /// Looks up the committed version of an object. Atomic per call; callers
    /// needing transaction awareness resolve through their session instead.
    pub fn view(&self, invid: Invid) -> Option<Arc<ObjectRecord>> {
        self.collections
            .read()
            .get(&invid.type_id)
            .and_then(|coll| coll.live.get(&invid.num))
            .cloned()
    }

    /// The point-in-time enumerable snapshot for a type, refreshed only at
    /// commit boundaries. Cheap to clone, safe for unsynchronized reads.
    pub fn iteration_set(&self, type_id: ObjectTypeId) -> Arc<Vec<Arc<ObjectRecord>>> {
        self.collections
            .read()
            .get(&type_id)
            .map(|coll| Arc::clone(&coll.iteration))
            .unwrap_or_default()
    }

    /// The current live objects of a type. Only meaningful while the caller
    /// holds a read lock covering the collection.
    pub fn live_objects(&self, type_id: ObjectTypeId) -> Vec<Arc<ObjectRecord>> {
        self.collections
            .read()
            .get(&type_id)
            .map(|coll| coll.live.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn allocate_num(&self, type_id: ObjectTypeId) -> u32 {
        let mut collections = self.collections.write();
        let coll = collections.entry(type_id).or_default();
        coll.next_num += 1;
        coll.next_num
    }

    /// Claims the exclusive right to shadow an object for edit.
    pub fn checkout(&self, invid: Invid, session: SessionId) -> Result<(), DirDbError> {
        let mut checkouts = self.checkouts.lock();
        match checkouts.get(&invid) {
            Some(&holder) if holder != session => Err(DirDbError::CheckoutConflict { invid }),
            _ => {
                checkouts.insert(invid, session);
                Ok(())
            }
        }
    }

    pub fn release_checkout(&self, invid: Invid, session: SessionId) {
        let mut checkouts = self.checkouts.lock();
        if checkouts.get(&invid) == Some(&session) {
            checkouts.remove(&invid);
        }
    }

    /// Applies a batch of commit mutations and refreshes the iteration
    /// snapshots of every touched type in one pass.
    pub fn apply_commit(&self, ops: Vec<CommitOp>) {
        let mut collections = self.collections.write();
        let mut touched: Vec<ObjectTypeId> = Vec::new();

        for op in ops {
            let type_id = match &op {
                CommitOp::Put(record) => record.invid().type_id,
                CommitOp::Remove(invid) => invid.type_id,
            };
            let coll = collections.entry(type_id).or_default();
            match op {
                CommitOp::Put(record) => {
                    let num = record.invid().num;
                    coll.next_num = coll.next_num.max(num);
                    coll.live.insert(num, record);
                }
                CommitOp::Remove(invid) => {
                    coll.live.remove(&invid.num);
                }
            }
            if !touched.contains(&type_id) {
                touched.push(type_id);
            }
        }

        for type_id in touched {
            if let Some(coll) = collections.get_mut(&type_id) {
                coll.refresh_iteration();
            }
        }
    }
}
