//! Uniqueness-enforcing value index.
//!
//! Fields bound to a namespace hold values that are unique across every
//! field attached to the same namespace. The index maps each held value to
//! the field instance currently holding it, which lets an EQUALS query on
//! such a field resolve in a single lookup instead of a full scan.

use crate::invid::{FieldId, Invid};
use crate::value::FieldValue;
use parking_lot::RwLock;
use std::collections::HashMap;

/// The field instance currently holding a namespace value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHandle {
    pub owner: Invid,
    pub field_id: FieldId,
}

#[derive(Debug)]
pub struct NamespaceIndex {
    name: String,
    values: RwLock<HashMap<FieldValue, FieldHandle>>,
}

impl NamespaceIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// O(1) lookup of the field instance holding `value`, if any.
    pub fn lookup(&self, value: &FieldValue) -> Option<FieldHandle> {
        self.values.read().get(value).copied()
    }

    /// Current holder of `value`, excluding `owner` itself. Used by the
    /// commit path to detect uniqueness violations.
    pub fn conflicting_holder(&self, value: &FieldValue, owner: Invid) -> Option<FieldHandle> {
        self.values
            .read()
            .get(value)
            .copied()
            .filter(|handle| handle.owner != owner)
    }

    /// Binds `value` to a field instance. Commit-path only.
    pub fn bind(&self, value: FieldValue, handle: FieldHandle) {
        self.values.write().insert(value, handle);
    }

    /// Releases every value held by `owner` in `field_id`. Commit-path only.
    pub fn unbind_owner(&self, owner: Invid, field_id: FieldId) {
        self.values
            .write()
            .retain(|_, handle| !(handle.owner == owner && handle.field_id == field_id));
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldHandle, NamespaceIndex};
    use crate::invid::Invid;
    use crate::value::FieldValue;

    #[test]
    fn bind_lookup_unbind() {
        let ns = NamespaceIndex::new("hostnames");
        let handle = FieldHandle {
            owner: Invid::new(3, 1),
            field_id: 12,
        };
        ns.bind(FieldValue::from("ns1.example.com"), handle);

        assert_eq!(ns.lookup(&FieldValue::from("ns1.example.com")), Some(handle));
        assert_eq!(ns.lookup(&FieldValue::from("ns2.example.com")), None);

        ns.unbind_owner(Invid::new(3, 1), 12);
        assert_eq!(ns.lookup(&FieldValue::from("ns1.example.com")), None);
    }

    #[test]
    fn conflicting_holder_ignores_self() {
        let ns = NamespaceIndex::new("hostnames");
        let holder = FieldHandle {
            owner: Invid::new(3, 1),
            field_id: 12,
        };
        ns.bind(FieldValue::from("gw"), holder);

        assert_eq!(
            ns.conflicting_holder(&FieldValue::from("gw"), Invid::new(3, 1)),
            None
        );
        assert_eq!(
            ns.conflicting_holder(&FieldValue::from("gw"), Invid::new(3, 2)),
            Some(holder)
        );
    }
}
