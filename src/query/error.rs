use crate::error::DirDbError;
use crate::invid::Invid;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnknownObjectType {
        type_ref: String,
    },
    UnknownField {
        type_name: String,
        field: String,
    },
    InvalidQuery {
        reason: String,
    },
    BadPattern {
        pattern: String,
        reason: String,
    },
    /// A whole-vector operation was applied to a scalar field.
    VectorOpOnScalar {
        field: String,
    },
    /// A comparator other than equality was aimed at the object identity.
    IdentityComparator {
        comparator: String,
    },
    /// The session logged out while the lock coordinator was blocking.
    LockInterrupted,
    /// The session's read lock was revoked mid-iteration.
    LockLost,
    /// An extant lock was supplied that does not cover the queried types.
    LockNotHeld {
        type_id: u16,
    },
    LoggedOut,
    DanglingReference {
        invid: Invid,
    },
    InternalError(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UnknownObjectType { type_ref } => {
                write!(f, "unknown object type '{type_ref}'")
            }
            QueryError::UnknownField { type_name, field } => {
                write!(f, "field '{field}' not found on object type '{type_name}'")
            }
            QueryError::InvalidQuery { reason } => write!(f, "invalid query: {reason}"),
            QueryError::BadPattern { pattern, reason } => {
                write!(f, "bad regex pattern '{pattern}': {reason}")
            }
            QueryError::VectorOpOnScalar { field } => {
                write!(f, "vector operation applied to scalar field '{field}'")
            }
            QueryError::IdentityComparator { comparator } => {
                write!(f, "comparator {comparator} cannot be applied to object identity")
            }
            QueryError::LockInterrupted => write!(f, "lock acquisition interrupted"),
            QueryError::LockLost => write!(f, "read lock lost during query iteration"),
            QueryError::LockNotHeld { type_id } => {
                write!(f, "supplied lock does not cover object type {type_id}")
            }
            QueryError::LoggedOut => write!(f, "session logged out during query"),
            QueryError::DanglingReference { invid } => {
                write!(f, "reference to missing object {invid}")
            }
            QueryError::InternalError(msg) => write!(f, "internal query error: {msg}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<DirDbError> for QueryError {
    fn from(value: DirDbError) -> Self {
        match value {
            DirDbError::UnknownObjectType(type_ref) => QueryError::UnknownObjectType { type_ref },
            DirDbError::UnknownField { type_id, field } => QueryError::UnknownField {
                type_name: type_id.to_string(),
                field,
            },
            DirDbError::UnknownObject(invid) => QueryError::DanglingReference { invid },
            DirDbError::SessionClosed => QueryError::LoggedOut,
            DirDbError::Validation(reason) => QueryError::InvalidQuery { reason },
            other => QueryError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_pattern() {
        let err = QueryError::BadPattern {
            pattern: "(a".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "bad regex pattern '(a': unclosed group");
    }

    #[test]
    fn session_closed_maps_to_logged_out() {
        assert_eq!(
            QueryError::from(DirDbError::SessionClosed),
            QueryError::LoggedOut
        );
    }
}
