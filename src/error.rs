use crate::invid::{Invid, ObjectTypeId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirDbErrorCode {
    Validation,
    UnknownObjectType,
    UnknownObject,
    UnknownField,
    CheckoutConflict,
    NoTransaction,
    TransactionAlreadyOpen,
    UniqueViolation,
    SessionClosed,
}

impl DirDbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DirDbErrorCode::Validation => "validation",
            DirDbErrorCode::UnknownObjectType => "unknown_object_type",
            DirDbErrorCode::UnknownObject => "unknown_object",
            DirDbErrorCode::UnknownField => "unknown_field",
            DirDbErrorCode::CheckoutConflict => "checkout_conflict",
            DirDbErrorCode::NoTransaction => "no_transaction",
            DirDbErrorCode::TransactionAlreadyOpen => "transaction_already_open",
            DirDbErrorCode::UniqueViolation => "unique_violation",
            DirDbErrorCode::SessionClosed => "session_closed",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DirDbError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown object type: {0}")]
    UnknownObjectType(String),
    #[error("object {0} not found")]
    UnknownObject(Invid),
    #[error("unknown field {field} on object type {type_id}")]
    UnknownField { type_id: ObjectTypeId, field: String },
    #[error("object {invid} is already checked out by another session")]
    CheckoutConflict { invid: Invid },
    #[error("no transaction is open on this session")]
    NoTransaction,
    #[error("a transaction is already open on this session")]
    TransactionAlreadyOpen,
    #[error("value already taken in namespace '{namespace}' (held by {holder})")]
    UniqueViolation { namespace: String, holder: Invid },
    #[error("session has been logged out")]
    SessionClosed,
}

impl DirDbError {
    pub fn code(&self) -> DirDbErrorCode {
        match self {
            DirDbError::Validation(_) => DirDbErrorCode::Validation,
            DirDbError::UnknownObjectType(_) => DirDbErrorCode::UnknownObjectType,
            DirDbError::UnknownObject(_) => DirDbErrorCode::UnknownObject,
            DirDbError::UnknownField { .. } => DirDbErrorCode::UnknownField,
            DirDbError::CheckoutConflict { .. } => DirDbErrorCode::CheckoutConflict,
            DirDbError::NoTransaction => DirDbErrorCode::NoTransaction,
            DirDbError::TransactionAlreadyOpen => DirDbErrorCode::TransactionAlreadyOpen,
            DirDbError::UniqueViolation { .. } => DirDbErrorCode::UniqueViolation,
            DirDbError::SessionClosed => DirDbErrorCode::SessionClosed,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::{DirDbError, DirDbErrorCode};
    use crate::invid::Invid;

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(DirDbErrorCode::CheckoutConflict.as_str(), "checkout_conflict");
        assert_eq!(DirDbErrorCode::UniqueViolation.as_str(), "unique_violation");
    }

    #[test]
    fn error_code_matches_variant() {
        let err = DirDbError::CheckoutConflict {
            invid: Invid::new(2, 9),
        };
        assert_eq!(err.code(), DirDbErrorCode::CheckoutConflict);
        assert_eq!(err.code_str(), "checkout_conflict");
    }
}
