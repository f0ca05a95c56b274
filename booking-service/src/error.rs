use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use shared::{ParseStatusError, SlotStateError};
use thiserror::Error;

pub type BookingResult<T> = Result<T, BookingError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Internal(String),
}

impl BookingError {
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Unauthenticated(_) => "unauthenticated",
            BookingError::InvalidArgument(_) => "invalid_argument",
            BookingError::NotFound(_) => "not_found",
            BookingError::FailedPrecondition(_) => "failed_precondition",
            BookingError::PermissionDenied(_) => "permission_denied",
            BookingError::Internal(_) => "internal",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, BookingError::Internal(_))
    }

    /// Replaces storage detail with a fixed message; the detail is only meant for logs.
    pub fn masked(self, public_message: &str) -> Self {
        match self {
            BookingError::Internal(_) => BookingError::Internal(public_message.to_string()),
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            BookingError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::FailedPrecondition(_) => StatusCode::CONFLICT,
            BookingError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            BookingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<diesel::result::Error> for BookingError {
    fn from(e: diesel::result::Error) -> Self {
        BookingError::Internal(format!("database error: {}", e))
    }
}

impl From<SlotStateError> for BookingError {
    fn from(e: SlotStateError) -> Self {
        BookingError::Internal(format!("corrupt slot record: {}", e))
    }
}

impl From<ParseStatusError> for BookingError {
    fn from(e: ParseStatusError) -> Self {
        BookingError::Internal(format!("corrupt appointment record: {}", e))
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(e: serde_json::Error) -> Self {
        BookingError::Internal(format!("event serialization failed: {}", e))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal messages are already masked by the service that raised them.
        let body = ErrorResponse {
            code: self.kind(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
