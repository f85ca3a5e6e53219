use crate::invid::Invid;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The value kinds a field may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Int,
    Float,
    Boolean,
    Date,
    Invid,
    IpAddr,
}

/// A single scalar field value.
///
/// Dates are millisecond timestamps. IP addresses are raw octet arrays,
/// 4 bytes for IPv4 and 16 for IPv6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Text(CompactString),
    Int(i64),
    Float(f64),
    Boolean(bool),
    Date(i64),
    Invid(Invid),
    IpAddr(Vec<u8>),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::Float(_) => ValueKind::Float,
            FieldValue::Boolean(_) => ValueKind::Boolean,
            FieldValue::Date(_) => ValueKind::Date,
            FieldValue::Invid(_) => ValueKind::Invid,
            FieldValue::IpAddr(_) => ValueKind::IpAddr,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            FieldValue::Boolean(_) => 0,
            FieldValue::Int(_) => 1,
            FieldValue::Date(_) => 2,
            FieldValue::Float(_) => 3,
            FieldValue::Text(_) => 4,
            FieldValue::Invid(_) => 5,
            FieldValue::IpAddr(_) => 6,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (FieldValue::Invid(a), FieldValue::Invid(b)) => a.cmp(b),
            (FieldValue::IpAddr(a), FieldValue::IpAddr(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for FieldValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            FieldValue::Text(s) => s.hash(state),
            FieldValue::Int(n) => n.hash(state),
            FieldValue::Float(f) => f.to_bits().hash(state),
            FieldValue::Boolean(b) => b.hash(state),
            FieldValue::Date(t) => t.hash(state),
            FieldValue::Invid(i) => i.hash(state),
            FieldValue::IpAddr(b) => b.hash(state),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.into())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s.into())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<Invid> for FieldValue {
    fn from(invid: Invid) -> Self {
        FieldValue::Invid(invid)
    }
}

/// Field contents: scalar or vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldContent {
    Scalar(FieldValue),
    Vector(Vec<FieldValue>),
}

impl FieldContent {
    pub fn is_vector(&self) -> bool {
        matches!(self, FieldContent::Vector(_))
    }

    /// A field holding an empty vector counts as undefined.
    pub fn is_defined(&self) -> bool {
        match self {
            FieldContent::Scalar(_) => true,
            FieldContent::Vector(values) => !values.is_empty(),
        }
    }

    pub fn as_scalar(&self) -> Option<&FieldValue> {
        match self {
            FieldContent::Scalar(value) => Some(value),
            FieldContent::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[FieldValue]> {
        match self {
            FieldContent::Scalar(_) => None,
            FieldContent::Vector(values) => Some(values),
        }
    }
}
