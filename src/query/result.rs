use crate::invid::{FieldId, Invid};
use crate::value::{FieldContent, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One listing row: identity, display label, and status flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub invid: Invid,
    pub label: String,
    pub inactivated: bool,
    pub will_expire: bool,
    pub will_be_removed: bool,
    pub editable: bool,
}

/// An unordered, deduplicated set of listing rows. Ordering follows
/// iteration order and is not stable across calls.
#[derive(Debug, Default, Clone)]
pub struct QueryResult {
    rows: Vec<ResultRow>,
    seen: HashSet<Invid>,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row unless the invid is already present.
    pub fn push(&mut self, row: ResultRow) -> bool {
        if self.seen.insert(row.invid) {
            self.rows.push(row);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, invid: Invid) -> bool {
        self.seen.contains(&invid)
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter()
    }

    pub fn invids(&self) -> impl Iterator<Item = Invid> + '_ {
        self.rows.iter().map(|row| row.invid)
    }
}

impl IntoIterator for QueryResult {
    type Item = ResultRow;
    type IntoIter = std::vec::IntoIter<ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Header entry for a dump projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFieldDef {
    pub id: FieldId,
    pub name: String,
    pub kind: ValueKind,
    pub vector: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRow {
    pub invid: Invid,
    pub label: String,
    /// Only fields visible to the querying session appear here.
    pub values: BTreeMap<FieldId, FieldContent>,
}

/// A dump: the listing plus full field values for a projected field set.
#[derive(Debug, Clone, Default)]
pub struct DumpResult {
    pub fields: Vec<DumpFieldDef>,
    pub rows: Vec<DumpRow>,
}

impl DumpResult {
    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.iter().map(|def| def.id)
    }
}
