//! Recursive evaluation of a query tree against a single object.
//!
//! Matching is deliberately forgiving at the leaves: a type mismatch or an
//! unsupported comparator for a value kind degrades to "no match" so one
//! malformed record cannot poison a whole scan. The exceptions are user
//! input errors (malformed regex, length operator on a scalar, identity
//! with a non-equality comparator), which are reported to the caller.

use crate::invid::Invid;
use crate::ip;
use crate::object::ObjectRecord;
use crate::permission::PermissionView;
use crate::query::error::QueryError;
use crate::query::plan::{Comparator, DataNode, FieldSpec, QueryNode, VectorOp};
use crate::schema::{FieldDef, SchemaRegistry};
use crate::store::ObjectResolver;
use crate::value::{FieldContent, FieldValue};

pub struct Matcher<'a> {
    schema: &'a SchemaRegistry,
    resolver: &'a dyn ObjectResolver,
    perms: &'a PermissionView,
}

impl<'a> Matcher<'a> {
    pub fn new(
        schema: &'a SchemaRegistry,
        resolver: &'a dyn ObjectResolver,
        perms: &'a PermissionView,
    ) -> Self {
        Self {
            schema,
            resolver,
            perms,
        }
    }

    /// A missing root is the trivial select-all.
    pub fn matches(&self, root: Option<&QueryNode>, obj: &ObjectRecord) -> Result<bool, QueryError> {
        match root {
            None => Ok(true),
            Some(node) => self.node_match(node, obj),
        }
    }

    fn node_match(&self, node: &QueryNode, obj: &ObjectRecord) -> Result<bool, QueryError> {
        match node {
            QueryNode::Not(child) => Ok(!self.node_match(child, obj)?),
            QueryNode::And(left, right) => {
                Ok(self.node_match(left, obj)? && self.node_match(right, obj)?)
            }
            QueryNode::Or(left, right) => {
                Ok(self.node_match(left, obj)? || self.node_match(right, obj)?)
            }
            QueryNode::DeRef { field, target } => self.deref_match(field, target, obj),
            QueryNode::Data(data) => self.data_match(data, obj),
        }
    }

    /// Follows an invid field and matches the subtree against each referent.
    /// A reference that no longer resolves is a race with a concurrent
    /// commit and is skipped, never raised.
    fn deref_match(
        &self,
        field: &FieldSpec,
        target: &QueryNode,
        obj: &ObjectRecord,
    ) -> Result<bool, QueryError> {
        let def = match field {
            FieldSpec::Id(_) | FieldSpec::Name(_) => self.field_def(field, obj)?,
            FieldSpec::Label | FieldSpec::Identity => {
                return Err(QueryError::InvalidQuery {
                    reason: "dereference requires a named or numbered invid field".to_string(),
                })
            }
        };
        if !def.is_invid() {
            return Err(QueryError::InvalidQuery {
                reason: format!("field '{}' is not an object reference", def.name),
            });
        }
        let Some(content) = obj.field(def.id) else {
            return Ok(false);
        };
        if !self.perms.can_read_field(self.resolver, obj, def.id) {
            return Ok(false);
        }
        match content {
            FieldContent::Scalar(FieldValue::Invid(target_invid)) => {
                self.referent_match(*target_invid, target)
            }
            FieldContent::Vector(values) => {
                for value in values {
                    if let FieldValue::Invid(target_invid) = value {
                        if self.referent_match(*target_invid, target)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn referent_match(&self, invid: Invid, target: &QueryNode) -> Result<bool, QueryError> {
        let Some(referent) = self.resolver.resolve(invid) else {
            return Ok(false); // dangling, concurrent delete
        };
        let visible = self
            .perms
            .get_perm(self.resolver, &referent)
            .map(|entry| entry.visible)
            .unwrap_or(false);
        if !visible {
            return Ok(false);
        }
        self.node_match(target, &referent)
    }

    fn data_match(&self, node: &DataNode, obj: &ObjectRecord) -> Result<bool, QueryError> {
        match &node.field {
            FieldSpec::Identity => self.identity_match(node, obj),
            FieldSpec::Label => {
                let label = FieldValue::from(obj.label());
                self.scalar_compare(&label, node)
            }
            FieldSpec::Id(_) | FieldSpec::Name(_) => {
                let def = self.field_def(&node.field, obj)?;
                self.field_match(node, &def, obj)
            }
        }
    }

    /// The object's own invid supports equality only.
    fn identity_match(&self, node: &DataNode, obj: &ObjectRecord) -> Result<bool, QueryError> {
        if node.comparator != Comparator::Equals {
            return Err(QueryError::IdentityComparator {
                comparator: format!("{:?}", node.comparator),
            });
        }
        match &node.operand {
            Some(FieldValue::Invid(invid)) => Ok(*invid == obj.invid()),
            _ => Ok(false),
        }
    }

    fn field_match(
        &self,
        node: &DataNode,
        def: &FieldDef,
        obj: &ObjectRecord,
    ) -> Result<bool, QueryError> {
        let Some(content) = obj.field(def.id) else {
            // An absent boolean field is defined to mean false, under equality only.
            return Ok(node.comparator == Comparator::Equals
                && node.operand == Some(FieldValue::Boolean(false)));
        };

        if !self.perms.can_read_field(self.resolver, obj, def.id) {
            return Ok(false);
        }

        if node.comparator == Comparator::Defined {
            return Ok(true);
        }

        match content {
            FieldContent::Scalar(value) => {
                if node.vector_op.is_some() {
                    return Err(QueryError::VectorOpOnScalar {
                        field: def.name.clone(),
                    });
                }
                self.scalar_compare(value, node)
            }
            FieldContent::Vector(values) => match node.vector_op {
                Some(VectorOp::LengthEq) => Ok(self.length_test(values.len(), node, |n, m| n == m)),
                Some(VectorOp::LengthGreater) => {
                    Ok(self.length_test(values.len(), node, |n, m| n > m))
                }
                Some(VectorOp::LengthGreaterEq) => {
                    Ok(self.length_test(values.len(), node, |n, m| n >= m))
                }
                Some(VectorOp::LengthLess) => {
                    Ok(self.length_test(values.len(), node, |n, m| n < m))
                }
                Some(VectorOp::LengthLessEq) => {
                    Ok(self.length_test(values.len(), node, |n, m| n <= m))
                }
                // Unset defaults to contains for vector fields.
                Some(VectorOp::Contains) | None => {
                    for value in values {
                        if self.scalar_compare(value, node)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            },
        }
    }

    fn length_test(&self, len: usize, node: &DataNode, test: fn(i64, i64) -> bool) -> bool {
        match &node.operand {
            Some(FieldValue::Int(n)) => test(len as i64, *n),
            _ => false,
        }
    }

    /// The full scalar comparison matrix. Unsupported pairings return
    /// false rather than erroring.
    fn scalar_compare(&self, value: &FieldValue, node: &DataNode) -> Result<bool, QueryError> {
        let Some(operand) = &node.operand else {
            return Ok(false);
        };
        match (value, operand) {
            (FieldValue::Text(a), FieldValue::Text(b)) => {
                self.text_compare(a.as_str(), b.as_str(), node)
            }
            (FieldValue::Invid(a), FieldValue::Invid(b)) => {
                Ok(node.comparator == Comparator::Equals && a == b)
            }
            // An invid on either side of a string comparison is resolved to
            // its label first.
            (FieldValue::Invid(invid), FieldValue::Text(text)) => {
                match self.resolver.label_of(*invid) {
                    Some(label) => self.text_compare(&label, text.as_str(), node),
                    None => Ok(false),
                }
            }
            (FieldValue::Text(text), FieldValue::Invid(invid)) => {
                match self.resolver.label_of(*invid) {
                    Some(label) => self.text_compare(text.as_str(), &label, node),
                    None => Ok(false),
                }
            }
            // IP bytes vs a string compare as canonical rendered text.
            (FieldValue::IpAddr(bytes), FieldValue::Text(text)) => match ip::render_ip(bytes) {
                Some(rendered) => self.text_compare(&rendered, text.as_str(), node),
                None => Ok(false),
            },
            (FieldValue::Text(text), FieldValue::IpAddr(bytes)) => match ip::render_ip(bytes) {
                Some(rendered) => self.text_compare(text.as_str(), &rendered, node),
                None => Ok(false),
            },
            (FieldValue::IpAddr(a), FieldValue::IpAddr(b)) => Ok(match node.comparator {
                Comparator::Equals => ip::ips_equal(a, b),
                Comparator::StartsWith => ip::ip_begins_with(a, b),
                Comparator::EndsWith => ip::ip_ends_with(a, b),
                _ => false,
            }),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => {
                Ok(node.comparator == Comparator::Equals && a == b)
            }
            (FieldValue::Date(a), FieldValue::Date(b)) => Ok(ordered_compare(
                node.comparator,
                a.cmp(b),
            )),
            (FieldValue::Int(a), FieldValue::Int(b)) => {
                Ok(ordered_compare(node.comparator, a.cmp(b)))
            }
            (FieldValue::Float(a), FieldValue::Float(b)) => {
                Ok(ordered_compare(node.comparator, a.total_cmp(b)))
            }
            _ => Ok(false),
        }
    }

    fn text_compare(&self, value: &str, operand: &str, node: &DataNode) -> Result<bool, QueryError> {
        match node.comparator {
            Comparator::Equals => Ok(value == operand),
            Comparator::NoCaseEquals => Ok(value.to_lowercase() == operand.to_lowercase()),
            Comparator::StartsWith => Ok(value.starts_with(operand)),
            Comparator::EndsWith => Ok(value.ends_with(operand)),
            Comparator::Less => Ok(value < operand),
            Comparator::LessEq => Ok(value <= operand),
            Comparator::Greater => Ok(value > operand),
            Comparator::GreaterEq => Ok(value >= operand),
            // Regex search, not a full-string match.
            Comparator::Matches | Comparator::NoCaseMatches => {
                Ok(node.pattern()?.is_match(value))
            }
            Comparator::Defined => Ok(true),
        }
    }

    fn field_def(
        &self,
        spec: &FieldSpec,
        obj: &ObjectRecord,
    ) -> Result<FieldDef, QueryError> {
        let type_id = obj.invid().type_id;
        let type_def = self
            .schema
            .object_type(type_id)
            .ok_or_else(|| QueryError::UnknownObjectType {
                type_ref: type_id.to_string(),
            })?;
        let found = match spec {
            FieldSpec::Id(id) => type_def.field(*id),
            FieldSpec::Name(name) => type_def.field_by_name(name),
            FieldSpec::Label | FieldSpec::Identity => None,
        };
        found.cloned().ok_or_else(|| QueryError::UnknownField {
            type_name: type_def.name.clone(),
            field: match spec {
                FieldSpec::Id(id) => id.to_string(),
                FieldSpec::Name(name) => name.clone(),
                _ => String::new(),
            },
        })
    }
}

fn ordered_compare(comparator: Comparator, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match comparator {
        Comparator::Equals => ordering == Equal,
        Comparator::Less => ordering == Less,
        Comparator::LessEq => ordering != Greater,
        Comparator::Greater => ordering == Greater,
        Comparator::GreaterEq => ordering != Less,
        _ => false,
    }
}
