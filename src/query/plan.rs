use crate::invid::{FieldId, ObjectTypeId};
use crate::query::error::QueryError;
use crate::value::FieldValue;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a leaf node names the field it tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldSpec {
    Id(FieldId),
    Name(String),
    /// The object's label field, whichever field the type declares it to be.
    Label,
    /// The object itself, compared as an invid.
    Identity,
}

impl From<FieldId> for FieldSpec {
    fn from(id: FieldId) -> Self {
        FieldSpec::Id(id)
    }
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        FieldSpec::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Equals,
    NoCaseEquals,
    StartsWith,
    EndsWith,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    /// True when the field holds any defined value; the operand is ignored.
    Defined,
    Matches,
    NoCaseMatches,
}

impl Comparator {
    pub fn is_regex(self) -> bool {
        matches!(self, Comparator::Matches | Comparator::NoCaseMatches)
    }
}

/// How a leaf node applies its comparator to a vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorOp {
    /// Default for vector fields: true if any element satisfies the
    /// comparator.
    Contains,
    LengthEq,
    LengthGreater,
    LengthGreaterEq,
    LengthLess,
    LengthLessEq,
}

/// A single field test. The compiled regex is cached on first use so a
/// pattern is compiled once per query tree, not once per candidate object.
#[derive(Debug, Serialize, Deserialize)]
pub struct DataNode {
    pub field: FieldSpec,
    pub comparator: Comparator,
    /// Present only when the test targets a vector field as a whole.
    pub vector_op: Option<VectorOp>,
    pub operand: Option<FieldValue>,
    #[serde(skip)]
    compiled: OnceCell<Regex>,
}

impl Clone for DataNode {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            comparator: self.comparator,
            vector_op: self.vector_op,
            operand: self.operand.clone(),
            compiled: OnceCell::new(),
        }
    }
}

impl PartialEq for DataNode {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
            && self.comparator == other.comparator
            && self.vector_op == other.vector_op
            && self.operand == other.operand
    }
}

impl DataNode {
    pub fn new(
        field: impl Into<FieldSpec>,
        comparator: Comparator,
        operand: impl Into<FieldValue>,
    ) -> Self {
        Self {
            field: field.into(),
            comparator,
            vector_op: None,
            operand: Some(operand.into()),
            compiled: OnceCell::new(),
        }
    }

    pub fn defined(field: impl Into<FieldSpec>) -> Self {
        Self {
            field: field.into(),
            comparator: Comparator::Defined,
            vector_op: None,
            operand: None,
            compiled: OnceCell::new(),
        }
    }

    pub fn on_vector(mut self, op: VectorOp) -> Self {
        self.vector_op = Some(op);
        self
    }

    /// Compiles the regex operand once and reuses it for every candidate.
    /// A malformed pattern is a query error, not a non-match.
    pub fn pattern(&self) -> Result<&Regex, QueryError> {
        let Some(FieldValue::Text(pattern)) = &self.operand else {
            return Err(QueryError::BadPattern {
                pattern: String::new(),
                reason: "regex comparator requires a text operand".to_string(),
            });
        };
        self.compiled.get_or_try_init(|| {
            let source = if self.comparator == Comparator::NoCaseMatches {
                format!("(?i){pattern}")
            } else {
                pattern.to_string()
            };
            Regex::new(&source).map_err(|err| QueryError::BadPattern {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryNode {
    And(Box<QueryNode>, Box<QueryNode>),
    Or(Box<QueryNode>, Box<QueryNode>),
    Not(Box<QueryNode>),
    /// Follows an invid field and applies the subtree to each referenced
    /// object.
    DeRef {
        field: FieldSpec,
        target: Box<QueryNode>,
    },
    Data(DataNode),
}

impl QueryNode {
    pub fn and(self, rhs: QueryNode) -> QueryNode {
        QueryNode::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: QueryNode) -> QueryNode {
        QueryNode::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> QueryNode {
        QueryNode::Not(Box::new(self))
    }

    pub fn deref(field: impl Into<FieldSpec>, target: QueryNode) -> QueryNode {
        QueryNode::DeRef {
            field: field.into(),
            target: Box::new(target),
        }
    }

    /// Calculates the maximum nesting depth of this tree.
    pub fn depth(&self) -> usize {
        match self {
            QueryNode::Data(_) => 1,
            QueryNode::Not(inner) | QueryNode::DeRef { target: inner, .. } => 1 + inner.depth(),
            QueryNode::And(left, right) | QueryNode::Or(left, right) => {
                1 + left.depth().max(right.depth())
            }
        }
    }

    /// Rejects trees deeper than the configured limit before evaluation,
    /// bounding matcher recursion.
    pub fn validate_depth(&self, max_depth: usize) -> Result<(), QueryError> {
        let depth = self.depth();
        if depth > max_depth {
            return Err(QueryError::InvalidQuery {
                reason: format!(
                    "query depth {} exceeds maximum allowed depth of {}",
                    depth, max_depth
                ),
            });
        }
        Ok(())
    }
}

impl From<DataNode> for QueryNode {
    fn from(node: DataNode) -> Self {
        QueryNode::Data(node)
    }
}

/// How a query names the object type it runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRef {
    Id(ObjectTypeId),
    Name(String),
}

impl From<ObjectTypeId> for TypeRef {
    fn from(id: ObjectTypeId) -> Self {
        TypeRef::Id(id)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        TypeRef::Name(name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub type_ref: TypeRef,
    /// `None` matches every object of the type.
    pub root: Option<QueryNode>,
    /// When set, results are narrowed to the session's visibility filter.
    pub filtered: bool,
    /// When set, only objects the session could check out appear.
    pub editable_only: bool,
    /// Field ids to project in a dump; `None` projects every visible
    /// built-in field.
    pub permit_list: Option<Vec<FieldId>>,
}

impl QuerySpec {
    pub fn all(type_ref: impl Into<TypeRef>) -> Self {
        Self {
            type_ref: type_ref.into(),
            root: None,
            filtered: false,
            editable_only: false,
            permit_list: None,
        }
    }

    pub fn matching(type_ref: impl Into<TypeRef>, root: impl Into<QueryNode>) -> Self {
        Self {
            type_ref: type_ref.into(),
            root: Some(root.into()),
            filtered: false,
            editable_only: false,
            permit_list: None,
        }
    }

    pub fn filtered(mut self) -> Self {
        self.filtered = true;
        self
    }

    pub fn editable_only(mut self) -> Self {
        self.editable_only = true;
        self
    }

    pub fn with_permit_list(mut self, fields: Vec<FieldId>) -> Self {
        self.permit_list = Some(fields);
        self
    }
}
