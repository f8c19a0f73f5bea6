//! HTTP mapping of domain errors.
//!
//! Internal details (database errors, decode failures) are logged here and
//! replaced by a generic message in the response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use session_protocol::ErrorBody;

use crate::domains::events::SubmitError;
use crate::domains::metadata::MetadataError;
use crate::domains::sequencing::AllocationError;
use crate::domains::sessions::SessionError;
use crate::kernel::StoreError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.to_string(),
                message: message.into(),
                retryable: false,
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// Retries ran out; the client should resubmit the same request.
    pub fn conflict_exhausted(message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::SERVICE_UNAVAILABLE, "conflict", message);
        err.body.retryable = true;
        err
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn store(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(message) => {
                Self::new(StatusCode::CONFLICT, "constraint_violation", message)
            }
            StoreError::SerializationConflict { .. } => Self::conflict_exhausted(err.to_string()),
            StoreError::CounterOverflow(_) => {
                Self::new(StatusCode::BAD_REQUEST, "counter_overflow", err.to_string())
            }
            other => {
                tracing::error!(error = %other, "storage failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AllocationError> for ApiError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::ScopeNotFound(_) => Self::not_found(err.to_string()),
            AllocationError::BatchTooLarge { .. } => Self::bad_request(err.to_string()),
            AllocationError::ConflictExhausted { .. } => Self::conflict_exhausted(err.to_string()),
            AllocationError::Store(store) => Self::store(store),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::MalformedEvent(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "malformed_event",
                err.to_string(),
            ),
            SubmitError::SessionNotFound(_) => Self::not_found(err.to_string()),
            SubmitError::ConflictExhausted { .. } => Self::conflict_exhausted(err.to_string()),
            SubmitError::Store(store) => Self::store(store),
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::SessionNotFound(_) => Self::not_found(err.to_string()),
            MetadataError::ConflictExhausted { .. } => Self::conflict_exhausted(err.to_string()),
            MetadataError::Store(store) => Self::store(store),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AccountNotFound(_) => Self::not_found(err.to_string()),
            SessionError::ConflictExhausted { .. } => Self::conflict_exhausted(err.to_string()),
            SessionError::Store(store) => Self::store(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_protocol::SessionId;

    #[test]
    fn exhausted_conflicts_are_retryable_503s() {
        let err = ApiError::from(SubmitError::ConflictExhausted {
            attempts: 4,
            source: StoreError::conflict(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body.error, "conflict");
        assert!(err.body.retryable);
    }

    #[test]
    fn database_details_are_not_exposed() {
        let err = ApiError::from(MetadataError::Store(StoreError::Database(
            sqlx::Error::PoolTimedOut,
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.message, "internal server error");
    }

    #[test]
    fn allocation_limits_are_400s() {
        let err = ApiError::from(AllocationError::BatchTooLarge { count: i64::MAX });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(!err.body.retryable);

        let err = ApiError::from(AllocationError::Store(StoreError::CounterOverflow(
            "session at 9223372036854775807 + 1".into(),
        )));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body.error, "counter_overflow");
    }

    #[test]
    fn missing_sessions_are_404s() {
        let err = ApiError::from(SubmitError::SessionNotFound(SessionId::new()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(!err.body.retryable);
    }
}
