//! Sessions and the per-transaction working set.
//!
//! Each logged-in identity gets a `Session`. A session may hold one open
//! transaction at a time; objects created, edited, or condemned inside it
//! live in the working-set overlay as shadow objects until commit. Queries
//! issued by the session resolve through the overlay first, so the session
//! observes its own uncommitted edits.

use crate::error::DirDbError;
use crate::invid::{Invid, ObjectTypeId};
use crate::object::{ObjectRecord, ShadowObject, ShadowStatus};
use crate::permission::PermissionView;
use crate::store::{CommitOp, ObjectResolver, SessionId};
use crate::namespace::FieldHandle;
use crate::value::{FieldContent, FieldValue};
use crate::DirDb;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Transaction {
    working_set: HashMap<Invid, ShadowObject>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    username: String,
    db: DirDb,
    perms: RwLock<PermissionView>,
    logged_in: AtomicBool,
    /// Raised on logout to interrupt any blocked lock acquisition.
    interrupted: AtomicBool,
    tx: Mutex<Option<Transaction>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, username: String, db: DirDb, perms: PermissionView) -> Self {
        Self {
            id,
            username,
            db,
            perms: RwLock::new(perms),
            logged_in: AtomicBool::new(true),
            interrupted: AtomicBool::new(false),
            tx: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn db(&self) -> &DirDb {
        &self.db
    }

    pub fn permission_view(&self) -> PermissionView {
        self.perms.read().clone()
    }

    /// Restricts query results to objects directly owned by one of the given
    /// owner groups. An empty set clears the restriction.
    pub fn set_visibility_filter(&self, owners: Vec<Invid>) {
        let current = self.perms.read().clone();
        *self.perms.write() = current.with_visibility_filter(owners);
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt_flag(&self) -> &AtomicBool {
        &self.interrupted
    }

    /// Ends the session. Any open transaction is abandoned; an in-flight
    /// query aborts at its next checkpoint.
    pub fn logout(&self) {
        self.logged_in.store(false, Ordering::Release);
        self.interrupted.store(true, Ordering::Release);
        let _ = self.abort_transaction();
    }

    // --- transaction lifecycle -------------------------------------------

    pub fn begin_transaction(&self) -> Result<(), DirDbError> {
        self.require_login()?;
        let mut tx = self.tx.lock();
        if tx.is_some() {
            return Err(DirDbError::TransactionAlreadyOpen);
        }
        *tx = Some(Transaction::default());
        Ok(())
    }

    pub fn is_transaction_open(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Creates a new object in the open transaction. The object exists only
    /// in the working set until commit.
    pub fn create_object(
        &self,
        type_id: ObjectTypeId,
        label: impl Into<String>,
    ) -> Result<Invid, DirDbError> {
        self.require_login()?;
        let type_def = self
            .db
            .schema()
            .object_type(type_id)
            .ok_or_else(|| DirDbError::UnknownObjectType(type_id.to_string()))?;

        let mut tx = self.tx.lock();
        let tx = tx.as_mut().ok_or(DirDbError::NoTransaction)?;

        let invid = Invid::new(type_def.id, self.db.store().allocate_num(type_id));
        self.db.store().checkout(invid, self.id)?;
        tx.working_set.insert(
            invid,
            ShadowObject {
                status: ShadowStatus::Creating,
                record: Arc::new(ObjectRecord::new(invid, label)),
            },
        );
        Ok(invid)
    }

    /// Checks an existing object out for edit. Checkout is exclusive across
    /// sessions; a second shadow for the same base object is refused.
    pub fn edit_object(&self, invid: Invid) -> Result<(), DirDbError> {
        self.require_login()?;
        let record = self
            .db
            .store()
            .view(invid)
            .ok_or(DirDbError::UnknownObject(invid))?;

        let mut tx = self.tx.lock();
        let tx = tx.as_mut().ok_or(DirDbError::NoTransaction)?;
        if tx.working_set.contains_key(&invid) {
            return Ok(()); // already ours
        }

        self.db.store().checkout(invid, self.id)?;
        tx.working_set.insert(
            invid,
            ShadowObject {
                status: ShadowStatus::Editing,
                record,
            },
        );
        Ok(())
    }

    /// Marks an object for deletion at commit. An object created in this
    /// same transaction is dropped instead.
    pub fn delete_object(&self, invid: Invid) -> Result<(), DirDbError> {
        self.require_login()?;
        {
            let mut tx = self.tx.lock();
            let tx = tx.as_mut().ok_or(DirDbError::NoTransaction)?;
            if let Some(shadow) = tx.working_set.get_mut(&invid) {
                shadow.status = match shadow.status {
                    ShadowStatus::Creating | ShadowStatus::Dropping => ShadowStatus::Dropping,
                    _ => ShadowStatus::Deleting,
                };
                return Ok(());
            }
        }
        self.edit_object(invid)?;
        let mut tx = self.tx.lock();
        if let Some(tx) = tx.as_mut() {
            if let Some(shadow) = tx.working_set.get_mut(&invid) {
                shadow.status = ShadowStatus::Deleting;
            }
        }
        Ok(())
    }

    /// Mutates the working copy of a checked-out object.
    pub fn update_object<F>(&self, invid: Invid, mutate: F) -> Result<(), DirDbError>
    where
        F: FnOnce(&mut ObjectRecord),
    {
        let mut tx = self.tx.lock();
        let tx = tx.as_mut().ok_or(DirDbError::NoTransaction)?;
        let shadow = tx
            .working_set
            .get_mut(&invid)
            .ok_or(DirDbError::UnknownObject(invid))?;
        mutate(Arc::make_mut(&mut shadow.record));
        Ok(())
    }

    /// Commits the open transaction: validates namespace uniqueness,
    /// excludes concurrent readers of the touched types, applies every
    /// shadow to the committed store, refreshes iteration snapshots, and
    /// rewrites the namespace indexes.
    pub fn commit_transaction(&self) -> Result<(), DirDbError> {
        self.require_login()?;
        let mut tx_guard = self.tx.lock();
        let tx = tx_guard.as_ref().ok_or(DirDbError::NoTransaction)?;

        self.validate_namespaces(tx)?;

        let mut touched: Vec<ObjectTypeId> = tx
            .working_set
            .keys()
            .map(|invid| invid.type_id)
            .collect();
        touched.sort_unstable();
        touched.dedup();

        let Some(tx) = tx_guard.take() else {
            return Err(DirDbError::NoTransaction);
        };
        let claim = self.db.locks().claim_write(touched);

        let mut ops = Vec::with_capacity(tx.working_set.len());
        for (invid, shadow) in &tx.working_set {
            self.rewrite_namespaces(*invid, shadow);
            match shadow.status {
                ShadowStatus::Creating | ShadowStatus::Editing => {
                    let mut record = (*shadow.record).clone();
                    self.refresh_label(&mut record);
                    ops.push(CommitOp::Put(Arc::new(record)));
                }
                ShadowStatus::Deleting => ops.push(CommitOp::Remove(*invid)),
                ShadowStatus::Dropping => {} // never committed, nothing to undo
            }
        }

        self.db.store().apply_commit(ops);
        drop(claim);

        for invid in tx.working_set.keys() {
            self.db.store().release_checkout(*invid, self.id);
        }

        tracing::debug!(session = self.id, "transaction committed");
        Ok(())
    }

    /// Discards the open transaction and every shadow in it.
    pub fn abort_transaction(&self) -> Result<(), DirDbError> {
        let mut tx_guard = self.tx.lock();
        let tx = tx_guard.take().ok_or(DirDbError::NoTransaction)?;
        for invid in tx.working_set.keys() {
            self.db.store().release_checkout(*invid, self.id);
        }
        Ok(())
    }

    // --- working-set access for query evaluation -------------------------

    /// The shadow this session holds for `invid`, if any.
    pub fn shadow_of(&self, invid: Invid) -> Option<ShadowObject> {
        self.tx
            .lock()
            .as_ref()
            .and_then(|tx| tx.working_set.get(&invid).cloned())
    }

    /// Every shadow of the given type in this session's working set.
    pub fn shadows_of_type(&self, type_id: ObjectTypeId) -> Vec<ShadowObject> {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| {
                tx.working_set
                    .values()
                    .filter(|shadow| shadow.record.invid().type_id == type_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn require_login(&self) -> Result<(), DirDbError> {
        if self.is_logged_in() {
            Ok(())
        } else {
            Err(DirDbError::SessionClosed)
        }
    }

    /// Re-derives the stored label from the type's label field so committed
    /// objects stay consistent with their own field contents.
    fn refresh_label(&self, record: &mut ObjectRecord) {
        let Some(type_def) = self.db.schema().object_type(record.invid().type_id) else {
            return;
        };
        if let Some(FieldContent::Scalar(FieldValue::Text(label))) =
            record.field(type_def.label_field)
        {
            let label = label.to_string();
            record.set_label(label);
        }
    }

    fn validate_namespaces(&self, tx: &Transaction) -> Result<(), DirDbError> {
        // Values claimed earlier in this same pass, so two shadows in one
        // transaction cannot both take a unique value.
        let mut claimed: HashMap<(String, FieldValue), Invid> = HashMap::new();
        for (invid, shadow) in &tx.working_set {
            if shadow.status.is_condemned() {
                continue;
            }
            let Some(type_def) = self.db.schema().object_type(invid.type_id) else {
                continue;
            };
            for field_def in &type_def.fields {
                let Some(namespace) = field_def.namespace.as_ref() else {
                    continue;
                };
                let Some(content) = shadow.record.field(field_def.id) else {
                    continue;
                };
                for value in field_values(content) {
                    if let Some(holder) = namespace.conflicting_holder(value, *invid) {
                        return Err(DirDbError::UniqueViolation {
                            namespace: namespace.name().to_string(),
                            holder: holder.owner,
                        });
                    }
                    let key = (namespace.name().to_string(), value.clone());
                    match claimed.entry(key) {
                        Entry::Occupied(entry) if *entry.get() != *invid => {
                            return Err(DirDbError::UniqueViolation {
                                namespace: namespace.name().to_string(),
                                holder: *entry.get(),
                            });
                        }
                        Entry::Occupied(_) => {}
                        Entry::Vacant(entry) => {
                            entry.insert(*invid);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn rewrite_namespaces(&self, invid: Invid, shadow: &ShadowObject) {
        let Some(type_def) = self.db.schema().object_type(invid.type_id) else {
            return;
        };
        for field_def in &type_def.fields {
            let Some(namespace) = field_def.namespace.as_ref() else {
                continue;
            };
            namespace.unbind_owner(invid, field_def.id);
            if shadow.status.is_condemned() {
                continue;
            }
            if let Some(content) = shadow.record.field(field_def.id) {
                for value in field_values(content) {
                    namespace.bind(
                        value.clone(),
                        FieldHandle {
                            owner: invid,
                            field_id: field_def.id,
                        },
                    );
                }
            }
        }
    }
}

fn field_values(content: &FieldContent) -> impl Iterator<Item = &FieldValue> {
    match content {
        FieldContent::Scalar(value) => std::slice::from_ref(value).iter(),
        FieldContent::Vector(values) => values.iter(),
    }
}

impl ObjectResolver for Session {
    /// Transaction-aware lookup: the session's own shadow is preferred over
    /// the committed version.
    fn resolve(&self, invid: Invid) -> Option<Arc<ObjectRecord>> {
        if let Some(shadow) = self.shadow_of(invid) {
            return Some(shadow.record);
        }
        self.db.store().view(invid)
    }
}
