//! Storage-level errors and their conflict classification.

use thiserror::Error;

/// SQLSTATE codes that mean "another transaction won; rerun yours".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// A racing insert of the same `(session_id, real_id)` surfaces as a unique
/// violation on this constraint rather than a serialization failure.
pub const REAL_ID_CONSTRAINT: &str = "session_events_session_real_id_key";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction lost a serialization race and may be retried.
    #[error("serialization conflict (sqlstate {code})")]
    SerializationConflict { code: String },

    /// A constraint was violated in a way retrying cannot fix.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Advancing a counter would exceed `i64::MAX`.
    #[error("counter overflow: {0}")]
    CounterOverflow(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    pub fn conflict() -> Self {
        StoreError::SerializationConflict {
            code: SERIALIZATION_FAILURE.to_string(),
        }
    }

    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self, StoreError::SerializationConflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(code @ (SERIALIZATION_FAILURE | DEADLOCK_DETECTED)) => {
                    return StoreError::SerializationConflict {
                        code: code.to_string(),
                    };
                }
                Some(UNIQUE_VIOLATION) if db_err.constraint() == Some(REAL_ID_CONSTRAINT) => {
                    return StoreError::SerializationConflict {
                        code: UNIQUE_VIOLATION.to_string(),
                    };
                }
                Some(UNIQUE_VIOLATION) => {
                    return StoreError::Constraint(db_err.message().to_string());
                }
                Some(NUMERIC_VALUE_OUT_OF_RANGE) => {
                    return StoreError::CounterOverflow(db_err.message().to_string());
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}
