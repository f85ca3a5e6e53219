//! Query dispatch: type resolution, fast paths, lock strategy, candidate
//! iteration, transaction overlay, and result filtering.

use crate::invid::{Invid, ObjectTypeId};
use crate::ip;
use crate::lock::{LockCoordinator, LockError, LockHandle};
use crate::object::{ObjectRecord, ShadowStatus};
use crate::permission::PermissionView;
use crate::query::error::QueryError;
use crate::query::matcher::Matcher;
use crate::query::plan::{Comparator, DataNode, FieldSpec, QueryNode, QuerySpec, TypeRef};
use crate::query::result::{DumpFieldDef, DumpResult, DumpRow, QueryResult, ResultRow};
use crate::schema::{FieldDef, ObjectTypeDef};
use crate::session::Session;
use crate::store::ObjectResolver;
use crate::value::FieldValue;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Releases an engine-acquired read lock on every exit path. A
/// caller-supplied lock is only verified, never released.
struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
    owned: Option<LockHandle>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.owned.take() {
            self.coordinator.release(&handle);
        }
    }
}

/// Per-call evaluation context. Constructed fresh for each dispatch so the
/// permission view is stable for the duration of one query.
pub struct QueryEngine<'a> {
    session: &'a Session,
    perms: PermissionView,
}

impl<'a> QueryEngine<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            perms: session.permission_view(),
            session,
        }
    }

    /// Filtered, permission-checked, owner-filtered listing.
    pub fn query(&self, spec: &QuerySpec) -> Result<QueryResult, QueryError> {
        self.dispatch(spec, false, None, None)
    }

    /// Same matching as `query`, plus full field values for the projected
    /// field set.
    pub fn dump(&self, spec: &QuerySpec) -> Result<DumpResult, QueryError> {
        let type_def = self.resolve_type(&spec.type_ref)?;
        let listing = self.dispatch(spec, false, None, None)?;

        let fields = self.dump_header(&type_def, spec);
        let mut rows = Vec::with_capacity(listing.len());
        for row in listing.iter() {
            let Some(record) = self.session.resolve(row.invid) else {
                continue; // deleted since the scan
            };
            let mut values = std::collections::BTreeMap::new();
            for def in &fields {
                if !self.perms.can_read_field(self.session, &record, def.id) {
                    continue;
                }
                if let Some(content) = record.field(def.id) {
                    values.insert(def.id, content.clone());
                }
            }
            rows.push(DumpRow {
                invid: row.invid,
                label: row.label.clone(),
                values,
            });
        }
        Ok(DumpResult { fields, rows })
    }

    /// Permission-aware but owner-filter-bypassing lookup for server-side
    /// use. Must not be invoked from commit-phase callbacks; the write
    /// claim held there would deadlock against this path's read lock.
    pub fn internal_query(&self, spec: &QuerySpec) -> Result<Vec<(Invid, String)>, QueryError> {
        let result = self.dispatch(spec, true, None, None)?;
        Ok(result
            .into_iter()
            .map(|row| (row.invid, row.label))
            .collect())
    }

    /// Dispatch against a caller-held read lock. The lock must already
    /// cover every collection the query needs.
    pub fn query_under_lock(
        &self,
        spec: &QuerySpec,
        lock: &LockHandle,
    ) -> Result<QueryResult, QueryError> {
        self.dispatch(spec, false, Some(lock), None)
    }

    /// Dispatch with labels rendered relative to a perspective object.
    pub fn query_from_perspective(
        &self,
        spec: &QuerySpec,
        perspective: Invid,
    ) -> Result<QueryResult, QueryError> {
        self.dispatch(spec, false, None, Some(perspective))
    }

    /// Status refresh for a batch of invids: transaction-aware resolve and
    /// permission check per invid, no iteration.
    pub fn query_invids(&self, invids: &[Invid]) -> Result<QueryResult, QueryError> {
        self.checkpoint(None, &[])?;
        let mut result = QueryResult::new();
        for invid in invids {
            let Some(record) = self.session.resolve(*invid) else {
                continue;
            };
            let status = self.session.shadow_of(*invid).map(|shadow| shadow.status);
            self.add_result_row(&mut result, &record, status, false, true, false, None);
        }
        Ok(result)
    }

    /// Label-to-invid resolution built on the equality fast path, with an
    /// optional alias fallback through the label field's namespace.
    pub fn find_labeled_object(
        &self,
        label: &str,
        type_ref: impl Into<TypeRef>,
        allow_aliases: bool,
    ) -> Result<Option<Invid>, QueryError> {
        let type_ref = type_ref.into();
        let type_def = self.resolve_type(&type_ref)?;

        let spec = QuerySpec::matching(
            type_ref,
            QueryNode::Data(DataNode::new(FieldSpec::Label, Comparator::Equals, label)),
        );
        let hits = self.internal_query(&spec)?;
        if let Some((invid, _)) = hits.first() {
            return Ok(Some(*invid));
        }
        if !allow_aliases {
            return Ok(None);
        }

        // Alias fallback: the label may be bound in the label field's
        // namespace by some other field instance (an alias vector, say).
        let Some(namespace) = type_def
            .label_field_def()
            .and_then(|def| def.namespace.clone())
        else {
            return Ok(None);
        };
        let Some(handle) = namespace.lookup(&FieldValue::from(label)) else {
            return Ok(None);
        };
        let Some(mut record) = self.session.resolve(handle.owner) else {
            return Ok(None);
        };
        // Walk embedded containers up to the enclosing top-level object.
        while record.is_embedded() {
            match record.parent().and_then(|parent| self.session.resolve(parent)) {
                Some(parent) => record = parent,
                None => return Ok(None),
            }
        }
        if record.invid().type_id == type_def.id {
            Ok(Some(record.invid()))
        } else {
            Ok(None)
        }
    }

    // --- dispatch --------------------------------------------------------

    fn dispatch(
        &self,
        spec: &QuerySpec,
        internal: bool,
        external_lock: Option<&LockHandle>,
        perspective: Option<Invid>,
    ) -> Result<QueryResult, QueryError> {
        if !self.session.is_logged_in() {
            return Err(QueryError::LoggedOut);
        }
        let type_def = self.resolve_type(&spec.type_ref)?;
        if let Some(root) = &spec.root {
            root.validate_depth(self.session.db().config().max_node_depth)?;
        }

        // Equality fast paths skip locks and iteration entirely.
        if let Some(QueryNode::Data(node)) = &spec.root {
            if node.comparator == Comparator::Equals && node.vector_op.is_none() {
                if let Some(result) =
                    self.equality_fast_path(node, &type_def, spec, internal, perspective)?
                {
                    return Ok(result);
                }
            }
        }

        // The lock set is the target type plus every type reachable
        // through dereference nodes.
        let mut lock_set = BTreeSet::new();
        lock_set.insert(type_def.id);
        if let Some(root) = &spec.root {
            collect_deref_types(root, &type_def, self.session, &mut lock_set);
        }
        let lock_set: Vec<ObjectTypeId> = lock_set.into_iter().collect();

        let db = self.session.db();
        let mut guard = LockGuard {
            coordinator: db.locks(),
            owned: None,
        };
        let active_lock: Option<&LockHandle> = match external_lock {
            Some(handle) => {
                if !db.locks().is_locked(handle, &lock_set) {
                    let missing = lock_set
                        .iter()
                        .find(|t| !handle.types().contains(t))
                        .copied()
                        .unwrap_or(type_def.id);
                    return Err(QueryError::LockNotHeld { type_id: missing });
                }
                Some(handle)
            }
            None if lock_set.len() > 1 => {
                let handle = db
                    .locks()
                    .acquire_read(lock_set.clone(), self.session.interrupt_flag(), db.config())
                    .map_err(|LockError::Interrupted| QueryError::LockInterrupted)?;
                guard.owned = Some(handle);
                guard.owned.as_ref()
            }
            // Single-collection queries iterate the lock-free snapshot.
            None => None,
        };

        let candidates: Vec<Arc<ObjectRecord>> = if active_lock.is_some() {
            db.store().live_objects(type_def.id)
        } else {
            db.store().iteration_set(type_def.id).as_ref().clone()
        };

        let matcher = Matcher::new(db.schema(), self.session, &self.perms);
        let mut result = QueryResult::new();

        for candidate in &candidates {
            self.checkpoint(active_lock, &lock_set)?;

            // Prefer this session's in-progress edit over the committed
            // version.
            let shadow = self.session.shadow_of(candidate.invid());
            let (record, status) = match &shadow {
                Some(shadow) => (shadow.record.as_ref(), Some(shadow.status)),
                None => (candidate.as_ref(), None),
            };
            if matcher.matches(spec.root.as_ref(), record)? {
                self.add_result_row(
                    &mut result,
                    record,
                    status,
                    spec.editable_only,
                    !spec.filtered,
                    internal,
                    perspective,
                );
            }
        }

        // Objects created in this transaction have no committed counterpart
        // yet; scan the working set for them.
        for shadow in self.session.shadows_of_type(type_def.id) {
            self.checkpoint(active_lock, &lock_set)?;
            if shadow.status.is_condemned() || result.contains(shadow.record.invid()) {
                continue;
            }
            if matcher.matches(spec.root.as_ref(), &shadow.record)? {
                self.add_result_row(
                    &mut result,
                    &shadow.record,
                    Some(shadow.status),
                    spec.editable_only,
                    !spec.filtered,
                    internal,
                    perspective,
                );
            }
        }

        tracing::debug!(
            session = self.session.id(),
            object_type = type_def.id,
            rows = result.len(),
            "query dispatched"
        );
        Ok(result)
    }

    /// Identity and namespace-index equality lookups. Returns `Ok(None)`
    /// when the node does not qualify for either path.
    fn equality_fast_path(
        &self,
        node: &DataNode,
        type_def: &ObjectTypeDef,
        spec: &QuerySpec,
        internal: bool,
        perspective: Option<Invid>,
    ) -> Result<Option<QueryResult>, QueryError> {
        match &node.field {
            FieldSpec::Identity => {
                let mut result = QueryResult::new();
                let Some(FieldValue::Invid(invid)) = &node.operand else {
                    return Ok(Some(result));
                };
                if invid.type_id != type_def.id {
                    return Ok(Some(result));
                }
                if let Some(record) = self.session.resolve(*invid) {
                    let status = self.session.shadow_of(*invid).map(|shadow| shadow.status);
                    self.add_result_row(
                        &mut result,
                        &record,
                        status,
                        spec.editable_only,
                        !spec.filtered,
                        internal,
                        perspective,
                    );
                }
                Ok(Some(result))
            }
            FieldSpec::Id(_) | FieldSpec::Name(_) => {
                let def = match &node.field {
                    FieldSpec::Id(id) => type_def.field(*id),
                    FieldSpec::Name(name) => type_def.field_by_name(name),
                    _ => None,
                };
                let Some(def) = def else {
                    // Let the general path report the unknown field.
                    return Ok(None);
                };
                let Some(namespace) = def.namespace.as_ref() else {
                    return Ok(None);
                };
                let Some(operand) = &node.operand else {
                    return Ok(None);
                };
                // The index reflects committed state only; a session with
                // in-flight shadows of this type scans instead, so its own
                // uncommitted values are found.
                if !self.session.shadows_of_type(type_def.id).is_empty() {
                    return Ok(None);
                }
                let probe = index_probe_value(def, operand);
                let mut result = QueryResult::new();
                let Some(handle) = namespace.lookup(&probe) else {
                    return Ok(Some(result)); // index miss is a definitive empty result
                };
                // The namespace may span several field definitions; only a
                // hit on the queried field counts.
                if handle.field_id != def.id || handle.owner.type_id != type_def.id {
                    return Ok(Some(result));
                }
                if let Some(record) = self.session.resolve(handle.owner) {
                    let status = self
                        .session
                        .shadow_of(handle.owner)
                        .map(|shadow| shadow.status);
                    self.add_result_row(
                        &mut result,
                        &record,
                        status,
                        spec.editable_only,
                        !spec.filtered,
                        internal,
                        perspective,
                    );
                }
                Ok(Some(result))
            }
            FieldSpec::Label => Ok(None),
        }
    }

    /// Per-iteration abort checkpoints: a logged-out session and a revoked
    /// lock are both fatal to the in-progress query.
    fn checkpoint(
        &self,
        active_lock: Option<&LockHandle>,
        lock_set: &[ObjectTypeId],
    ) -> Result<(), QueryError> {
        if !self.session.is_logged_in() {
            return Err(QueryError::LoggedOut);
        }
        if let Some(handle) = active_lock {
            if !self.session.db().locks().is_locked(handle, lock_set) {
                return Err(QueryError::LockLost);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_result_row(
        &self,
        result: &mut QueryResult,
        record: &ObjectRecord,
        shadow_status: Option<ShadowStatus>,
        editable_only: bool,
        unfiltered: bool,
        internal: bool,
        perspective: Option<Invid>,
    ) {
        // A shadow condemned in this transaction is semantically gone.
        if shadow_status.is_some_and(|status| status.is_condemned()) {
            return;
        }

        let editable = if self.perms.is_supergash() {
            true
        } else {
            let Some(perm) = self.perms.get_perm(self.session, record) else {
                return;
            };
            if !perm.visible {
                return;
            }
            perm.editable
        };
        if editable_only && !editable {
            return;
        }

        // Owner-visibility filtering checks the object's direct owner list
        // against the session's filter set, without recursion.
        if !internal && !unfiltered && !self.perms.filter_match(record) {
            return;
        }

        result.push(ResultRow {
            invid: record.invid(),
            label: self.display_label(record, perspective),
            inactivated: record.is_inactivated(),
            will_expire: record.will_expire(),
            will_be_removed: record.will_be_removed(),
            editable,
        });
    }

    fn display_label(&self, record: &ObjectRecord, perspective: Option<Invid>) -> String {
        if let Some(perspective) = perspective {
            if let Some(container) = self.session.resolve(perspective) {
                return format!("{}:{}", container.label(), record.label());
            }
        }
        if record.is_embedded() {
            if let Some(parent) = record.parent().and_then(|p| self.session.resolve(p)) {
                return format!("{}:{}", parent.label(), record.label());
            }
        }
        record.label().to_string()
    }

    fn dump_header(&self, type_def: &ObjectTypeDef, spec: &QuerySpec) -> Vec<DumpFieldDef> {
        type_def
            .fields
            .iter()
            .filter(|def| match &spec.permit_list {
                Some(permit) => permit.contains(&def.id),
                None => true,
            })
            .filter(|def| {
                self.perms
                    .type_field_perm(type_def.id, def.id)
                    .map(|entry| entry.visible)
                    .unwrap_or(false)
            })
            .map(|def| DumpFieldDef {
                id: def.id,
                name: def.name.clone(),
                kind: def.kind,
                vector: def.vector,
            })
            .collect()
    }

    fn resolve_type(&self, type_ref: &TypeRef) -> Result<Arc<ObjectTypeDef>, QueryError> {
        let schema = self.session.db().schema();
        let found = match type_ref {
            TypeRef::Id(id) => schema.object_type(*id),
            TypeRef::Name(name) => schema.object_type_by_name(name),
        };
        found.ok_or_else(|| QueryError::UnknownObjectType {
            type_ref: match type_ref {
                TypeRef::Id(id) => id.to_string(),
                TypeRef::Name(name) => name.clone(),
            },
        })
    }
}

/// IP-typed index fields are probed with address bytes; a string operand is
/// converted by trying the IPv4 encoding first, then IPv6.
fn index_probe_value(def: &FieldDef, operand: &FieldValue) -> FieldValue {
    if def.is_ip() {
        if let FieldValue::Text(text) = operand {
            if let Some(bytes) = ip::parse_ipv4(text).or_else(|| ip::parse_ipv6(text)) {
                return FieldValue::IpAddr(bytes);
            }
        }
    }
    operand.clone()
}

/// Walks the query tree collecting every object type reachable through a
/// dereference, tracking the type context as it descends. Fields whose
/// target type is undeclared contribute nothing; those dereferences read
/// the snapshot best-effort.
fn collect_deref_types(
    node: &QueryNode,
    context: &ObjectTypeDef,
    session: &Session,
    out: &mut BTreeSet<ObjectTypeId>,
) {
    match node {
        QueryNode::And(left, right) | QueryNode::Or(left, right) => {
            collect_deref_types(left, context, session, out);
            collect_deref_types(right, context, session, out);
        }
        QueryNode::Not(child) => collect_deref_types(child, context, session, out),
        QueryNode::DeRef { field, target } => {
            let def = match field {
                FieldSpec::Id(id) => context.field(*id),
                FieldSpec::Name(name) => context.field_by_name(name),
                _ => None,
            };
            if let Some(target_type) = def.and_then(|def| def.target_type) {
                out.insert(target_type);
                if let Some(next) = session.db().schema().object_type(target_type) {
                    collect_deref_types(target, &next, session, out);
                }
            }
        }
        QueryNode::Data(_) => {}
    }
}
