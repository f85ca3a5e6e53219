use crate::invid::{FieldId, Invid};
use crate::schema::FIELD_OWNER_LIST;
use crate::value::{FieldContent, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A committed directory object (or the record payload of a shadow copy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    invid: Invid,
    label: String,
    fields: BTreeMap<FieldId, FieldContent>,
    embedded: bool,
    parent: Option<Invid>,
    inactivated: bool,
    expiration_date: Option<i64>,
    removal_date: Option<i64>,
}

impl ObjectRecord {
    pub fn new(invid: Invid, label: impl Into<String>) -> Self {
        Self {
            invid,
            label: label.into(),
            fields: BTreeMap::new(),
            embedded: false,
            parent: None,
            inactivated: false,
            expiration_date: None,
            removal_date: None,
        }
    }

    pub fn invid(&self) -> Invid {
        self.invid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn parent(&self) -> Option<Invid> {
        self.parent
    }

    pub fn is_inactivated(&self) -> bool {
        self.inactivated
    }

    pub fn will_expire(&self) -> bool {
        self.expiration_date.is_some()
    }

    pub fn will_be_removed(&self) -> bool {
        self.removal_date.is_some()
    }

    /// Returns the field's content only when it is defined; an empty vector
    /// field reads as absent, matching the undefined-field query semantics.
    pub fn field(&self, id: FieldId) -> Option<&FieldContent> {
        self.fields.get(&id).filter(|content| content.is_defined())
    }

    pub fn raw_field(&self, id: FieldId) -> Option<&FieldContent> {
        self.fields.get(&id)
    }

    pub fn set_field(&mut self, id: FieldId, content: FieldContent) {
        self.fields.insert(id, content);
    }

    pub fn set_scalar(&mut self, id: FieldId, value: impl Into<FieldValue>) {
        self.fields.insert(id, FieldContent::Scalar(value.into()));
    }

    pub fn set_vector(&mut self, id: FieldId, values: Vec<FieldValue>) {
        self.fields.insert(id, FieldContent::Vector(values));
    }

    pub fn clear_field(&mut self, id: FieldId) {
        self.fields.remove(&id);
    }

    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.keys().copied()
    }

    /// The object's direct owner-group invids, from the well-known owner
    /// list field. Empty when the field is absent.
    pub fn owner_list(&self) -> Vec<Invid> {
        match self.field(FIELD_OWNER_LIST) {
            Some(FieldContent::Vector(values)) => values
                .iter()
                .filter_map(|value| match value {
                    FieldValue::Invid(invid) => Some(*invid),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_inactivated(&mut self, inactivated: bool) {
        self.inactivated = inactivated;
    }

    pub fn set_expiration_date(&mut self, millis: Option<i64>) {
        self.expiration_date = millis;
    }

    pub fn set_removal_date(&mut self, millis: Option<i64>) {
        self.removal_date = millis;
    }

    pub fn set_embedded(&mut self, parent: Invid) {
        self.embedded = true;
        self.parent = Some(parent);
    }
}

/// Lifecycle status of a shadow (in-transaction) object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowStatus {
    /// Newly created in this transaction, no committed counterpart.
    Creating,
    /// Checked out for edit from a committed object.
    Editing,
    /// A committed object marked for deletion.
    Deleting,
    /// A created-then-abandoned object being discarded.
    Dropping,
}

impl ShadowStatus {
    /// Deleting and dropping shadows are semantically already gone and are
    /// excluded from query results.
    pub fn is_condemned(self) -> bool {
        matches!(self, ShadowStatus::Deleting | ShadowStatus::Dropping)
    }
}

/// The in-progress copy of an object held by exactly one open transaction.
/// The record is shared out to query evaluation, so edits go through
/// `Arc::make_mut` on the owning session's working set.
#[derive(Debug, Clone)]
pub struct ShadowObject {
    pub status: ShadowStatus,
    pub record: std::sync::Arc<ObjectRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invid::Invid;

    #[test]
    fn empty_vector_field_reads_as_absent() {
        let mut obj = ObjectRecord::new(Invid::new(2, 1), "host1");
        obj.set_vector(7, vec![]);
        assert!(obj.field(7).is_none());
        assert!(obj.raw_field(7).is_some());
    }

    #[test]
    fn owner_list_collects_invid_values_only() {
        let mut obj = ObjectRecord::new(Invid::new(2, 1), "host1");
        obj.set_vector(
            FIELD_OWNER_LIST,
            vec![
                FieldValue::Invid(Invid::new(0, 4)),
                FieldValue::Invid(Invid::new(0, 9)),
            ],
        );
        assert_eq!(obj.owner_list(), vec![Invid::new(0, 4), Invid::new(0, 9)]);

        let bare = ObjectRecord::new(Invid::new(2, 2), "host2");
        assert!(bare.owner_list().is_empty());
    }

    #[test]
    fn condemned_statuses() {
        assert!(ShadowStatus::Deleting.is_condemned());
        assert!(ShadowStatus::Dropping.is_condemned());
        assert!(!ShadowStatus::Creating.is_condemned());
        assert!(!ShadowStatus::Editing.is_condemned());
    }
}
