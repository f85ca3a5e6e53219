use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier for an object type (a "base" collection).
pub type ObjectTypeId = u16;

/// Numeric identifier for a field within an object type.
pub type FieldId = u16;

/// A stable object identifier: (object-type id, instance number).
///
/// Invids are the universal cross-reference key in the directory store:
/// object-to-object references, query targets, and result keys are all
/// expressed in terms of Invids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Invid {
    pub type_id: ObjectTypeId,
    pub num: u32,
}

impl Invid {
    pub const fn new(type_id: ObjectTypeId, num: u32) -> Self {
        Self { type_id, num }
    }
}

impl fmt::Display for Invid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_id, self.num)
    }
}

#[cfg(test)]
mod tests {
    use super::Invid;

    #[test]
    fn invid_equality_is_by_value() {
        assert_eq!(Invid::new(3, 17), Invid::new(3, 17));
        assert_ne!(Invid::new(3, 17), Invid::new(4, 17));
        assert_ne!(Invid::new(3, 17), Invid::new(3, 18));
    }

    #[test]
    fn invid_display_is_type_colon_num() {
        assert_eq!(Invid::new(12, 405).to_string(), "12:405");
    }
}
