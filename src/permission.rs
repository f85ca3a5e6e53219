//! Permission entries, role matrices, and the per-session permission view.
//!
//! A session's view is two immutable matrices: one applied to objects the
//! session's persona owns (directly or through the owner-group containment
//! graph) and one applied to everything else. Supergash bypasses both.

use crate::invid::{FieldId, Invid, ObjectTypeId};
use crate::object::ObjectRecord;
use crate::schema::{
    FIELD_OWNER_LIST, FIELD_OWNER_MEMBERS, FIELD_PERSONA_GROUPS, OWNER_GROUP_TYPE, PERSONA_TYPE,
};
use crate::store::ObjectResolver;
use crate::value::{FieldContent, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Capability bits for an object type or an individual field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermEntry {
    pub visible: bool,
    pub editable: bool,
    pub create: bool,
    pub delete: bool,
}

impl PermEntry {
    pub const fn full() -> Self {
        Self {
            visible: true,
            editable: true,
            create: true,
            delete: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            visible: false,
            editable: false,
            create: false,
            delete: false,
        }
    }

    pub const fn view_only() -> Self {
        Self {
            visible: true,
            editable: false,
            create: false,
            delete: false,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            visible: self.visible || other.visible,
            editable: self.editable || other.editable,
            create: self.create || other.create,
            delete: self.delete || other.delete,
        }
    }

    pub fn intersection(self, other: Self) -> Self {
        Self {
            visible: self.visible && other.visible,
            editable: self.editable && other.editable,
            create: self.create && other.create,
            delete: self.delete && other.delete,
        }
    }
}

/// An immutable capability matrix keyed by (object type, optional field).
/// Field entries fall back to the enclosing type entry.
#[derive(Debug, Clone, Default)]
pub struct PermMatrix {
    entries: im::HashMap<(ObjectTypeId, Option<FieldId>), PermEntry>,
}

impl PermMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, type_id: ObjectTypeId, entry: PermEntry) -> Self {
        self.entries.insert((type_id, None), entry);
        self
    }

    pub fn with_field(mut self, type_id: ObjectTypeId, field: FieldId, entry: PermEntry) -> Self {
        self.entries.insert((type_id, Some(field)), entry);
        self
    }

    pub fn object_entry(&self, type_id: ObjectTypeId) -> Option<PermEntry> {
        self.entries.get(&(type_id, None)).copied()
    }

    pub fn field_entry(&self, type_id: ObjectTypeId, field: FieldId) -> Option<PermEntry> {
        self.entries
            .get(&(type_id, Some(field)))
            .copied()
            .or_else(|| self.object_entry(type_id))
    }
}

/// The session identity's resolved permission state.
#[derive(Debug, Clone, Default)]
pub struct PermissionView {
    supergash: bool,
    persona: Option<Invid>,
    /// Applied to objects the persona owns through the owner-group graph.
    owned_matrix: PermMatrix,
    /// Applied to everything else.
    default_matrix: PermMatrix,
    /// Owner groups the session has chosen to restrict its result view to.
    /// Empty means unrestricted.
    visibility_filter: Vec<Invid>,
}

impl PermissionView {
    /// The full-privilege identity that bypasses all permission checks.
    pub fn supergash() -> Self {
        Self {
            supergash: true,
            ..Self::default()
        }
    }

    pub fn for_persona(persona: Invid, owned: PermMatrix, default: PermMatrix) -> Self {
        Self {
            supergash: false,
            persona: Some(persona),
            owned_matrix: owned,
            default_matrix: default,
            visibility_filter: Vec::new(),
        }
    }

    /// An anonymous view: no persona, default matrix only.
    pub fn unauthenticated(default: PermMatrix) -> Self {
        Self {
            supergash: false,
            persona: None,
            owned_matrix: PermMatrix::new(),
            default_matrix: default,
            visibility_filter: Vec::new(),
        }
    }

    pub fn with_visibility_filter(mut self, owners: Vec<Invid>) -> Self {
        self.visibility_filter = owners;
        self
    }

    pub fn is_supergash(&self) -> bool {
        self.supergash
    }

    pub fn persona(&self) -> Option<Invid> {
        self.persona
    }

    /// The object-level capability entry for `obj`, or None when no matrix
    /// row applies (callers exclude the object).
    pub fn get_perm(&self, resolver: &dyn ObjectResolver, obj: &ObjectRecord) -> Option<PermEntry> {
        if self.supergash {
            return Some(PermEntry::full());
        }
        let matrix = if self.owns(resolver, obj) {
            &self.owned_matrix
        } else {
            &self.default_matrix
        };
        matrix.object_entry(obj.invid().type_id)
    }

    /// The capability entry for one field of an object type, selected by
    /// whether the session owns the object under examination.
    pub fn get_field_perm(
        &self,
        resolver: &dyn ObjectResolver,
        obj: &ObjectRecord,
        field: FieldId,
    ) -> Option<PermEntry> {
        if self.supergash {
            return Some(PermEntry::full());
        }
        let matrix = if self.owns(resolver, obj) {
            &self.owned_matrix
        } else {
            &self.default_matrix
        };
        matrix.field_entry(obj.invid().type_id, field)
    }

    /// Field read check used at every comparison step during matching.
    pub fn can_read_field(
        &self,
        resolver: &dyn ObjectResolver,
        obj: &ObjectRecord,
        field: FieldId,
    ) -> bool {
        self.get_field_perm(resolver, obj, field)
            .map(|entry| entry.visible)
            .unwrap_or(false)
    }

    /// Type-level field capability without an object in hand, for dump
    /// header projection.
    pub fn type_field_perm(&self, type_id: ObjectTypeId, field: FieldId) -> Option<PermEntry> {
        if self.supergash {
            return Some(PermEntry::full());
        }
        // without a concrete object there is no ownership context; the
        // default matrix governs
        self.default_matrix.field_entry(type_id, field)
    }

    /// Owner-visibility result filter: the object must be directly owned by
    /// at least one group in the filter set. No recursion at filter time.
    pub fn filter_match(&self, obj: &ObjectRecord) -> bool {
        if self.visibility_filter.is_empty() {
            return true;
        }
        obj.owner_list()
            .iter()
            .any(|owner| self.visibility_filter.contains(owner))
    }

    /// True when the session's persona has an ownership relationship with
    /// `obj` through its owner-group list.
    fn owns(&self, resolver: &dyn ObjectResolver, obj: &ObjectRecord) -> bool {
        let Some(persona) = self.persona else {
            return false;
        };

        let mut owners = obj.owner_list();

        // owner groups are self-owning
        if obj.invid().type_id == OWNER_GROUP_TYPE && !owners.contains(&obj.invid()) {
            owners.push(obj.invid());
        }

        // admin personas are owned by the groups they belong to
        if obj.invid().type_id == PERSONA_TYPE {
            if let Some(FieldContent::Vector(groups)) = obj.field(FIELD_PERSONA_GROUPS) {
                for value in groups {
                    if let FieldValue::Invid(group) = value {
                        if !owners.contains(group) {
                            owners.push(*group);
                        }
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        owners
            .iter()
            .any(|owner| owner_chain_match(resolver, persona, *owner, &mut seen))
    }

    /// Public entry point for owner-chain membership, shared with tests and
    /// maintenance jobs.
    pub fn is_member_of_owner_chain(
        &self,
        resolver: &dyn ObjectResolver,
        owner: Invid,
    ) -> bool {
        match self.persona {
            Some(persona) => owner_chain_match(resolver, persona, owner, &mut HashSet::new()),
            None => false,
        }
    }
}

/// Depth-first search up the owner-group containment graph: does `persona`
/// appear in `owner`'s member list, or in the member list of any group that
/// contains `owner`? The seen-set guards against ownership cycles.
fn owner_chain_match(
    resolver: &dyn ObjectResolver,
    persona: Invid,
    owner: Invid,
    seen: &mut HashSet<Invid>,
) -> bool {
    if !seen.insert(owner) {
        return false;
    }

    let Some(owner_obj) = resolver.resolve(owner) else {
        return false;
    };

    if let Some(FieldContent::Vector(members)) = owner_obj.field(FIELD_OWNER_MEMBERS) {
        if members.contains(&FieldValue::Invid(persona)) {
            return true;
        }
    }

    // not a direct member; walk up into the groups that own this group
    if let Some(FieldContent::Vector(parents)) = owner_obj.field(FIELD_OWNER_LIST) {
        for value in parents {
            if let FieldValue::Invid(parent) = value {
                if owner_chain_match(resolver, persona, *parent, seen) {
                    return true;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CommitOp, ObjectStore};
    use std::sync::Arc;

    fn owner_group(num: u32, members: Vec<Invid>, parents: Vec<Invid>) -> ObjectRecord {
        let mut group = ObjectRecord::new(Invid::new(OWNER_GROUP_TYPE, num), format!("group{num}"));
        group.set_vector(
            FIELD_OWNER_MEMBERS,
            members.into_iter().map(FieldValue::Invid).collect(),
        );
        if !parents.is_empty() {
            group.set_vector(
                FIELD_OWNER_LIST,
                parents.into_iter().map(FieldValue::Invid).collect(),
            );
        }
        group
    }

    #[test]
    fn direct_membership_matches() {
        let store = ObjectStore::new();
        let persona = Invid::new(PERSONA_TYPE, 1);
        store.apply_commit(vec![CommitOp::Put(Arc::new(owner_group(
            1,
            vec![persona],
            vec![],
        )))]);

        let view = PermissionView::for_persona(persona, PermMatrix::new(), PermMatrix::new());
        assert!(view.is_member_of_owner_chain(&store, Invid::new(OWNER_GROUP_TYPE, 1)));
        assert!(!view.is_member_of_owner_chain(&store, Invid::new(OWNER_GROUP_TYPE, 9)));
    }

    #[test]
    fn membership_recurses_up_the_containment_graph() {
        let store = ObjectStore::new();
        let persona = Invid::new(PERSONA_TYPE, 1);
        // persona is a member of group 1; group 2 is owned by group 1, so
        // persona has authority over group 2's scope as well
        store.apply_commit(vec![
            CommitOp::Put(Arc::new(owner_group(1, vec![persona], vec![]))),
            CommitOp::Put(Arc::new(owner_group(
                2,
                vec![],
                vec![Invid::new(OWNER_GROUP_TYPE, 1)],
            ))),
        ]);

        let view = PermissionView::for_persona(persona, PermMatrix::new(), PermMatrix::new());
        assert!(view.is_member_of_owner_chain(&store, Invid::new(OWNER_GROUP_TYPE, 2)));
    }

    #[test]
    fn ownership_cycles_terminate() {
        let store = ObjectStore::new();
        let persona = Invid::new(PERSONA_TYPE, 1);
        store.apply_commit(vec![
            CommitOp::Put(Arc::new(owner_group(
                1,
                vec![],
                vec![Invid::new(OWNER_GROUP_TYPE, 2)],
            ))),
            CommitOp::Put(Arc::new(owner_group(
                2,
                vec![],
                vec![Invid::new(OWNER_GROUP_TYPE, 1)],
            ))),
        ]);

        let view = PermissionView::for_persona(persona, PermMatrix::new(), PermMatrix::new());
        assert!(!view.is_member_of_owner_chain(&store, Invid::new(OWNER_GROUP_TYPE, 1)));
    }

    #[test]
    fn filter_match_is_direct_only() {
        let g1 = Invid::new(OWNER_GROUP_TYPE, 1);
        let g2 = Invid::new(OWNER_GROUP_TYPE, 2);
        let mut obj = ObjectRecord::new(Invid::new(5, 1), "host");
        obj.set_vector(FIELD_OWNER_LIST, vec![FieldValue::Invid(g2)]);

        let unfiltered = PermissionView::supergash();
        assert!(unfiltered.filter_match(&obj));

        let filtered = PermissionView::supergash().with_visibility_filter(vec![g1]);
        // owned only by g2; g1 in the filter does not match, even if g1
        // contains g2 elsewhere in the graph
        assert!(!filtered.filter_match(&obj));

        let filtered = PermissionView::supergash().with_visibility_filter(vec![g2]);
        assert!(filtered.filter_match(&obj));
    }

    #[test]
    fn field_entry_falls_back_to_type_entry() {
        let matrix = PermMatrix::new()
            .with_type(5, PermEntry::view_only())
            .with_field(5, 11, PermEntry::none());

        assert_eq!(matrix.field_entry(5, 11), Some(PermEntry::none()));
        assert_eq!(matrix.field_entry(5, 12), Some(PermEntry::view_only()));
        assert_eq!(matrix.field_entry(6, 12), None);
    }

    #[test]
    fn perm_entry_set_algebra() {
        let v = PermEntry::view_only();
        let e = PermEntry {
            visible: false,
            editable: true,
            create: false,
            delete: false,
        };
        assert_eq!(
            v.union(e),
            PermEntry {
                visible: true,
                editable: true,
                create: false,
                delete: false,
            }
        );
        assert_eq!(v.intersection(e), PermEntry::none());
    }
}
