//! HTTP error type for the Clavum server.
//!
//! A closed taxonomy: every handler failure maps onto one of these kinds,
//! and each kind maps onto exactly one status code. Crypto failures are
//! never surfaced verbatim — they arrive here already coarsened to
//! `BadRequest` or `Internal`. `Unauthenticated` and `Replayed` carry
//! fixed messages so the auth gate cannot leak why a request was refused.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use clavum_core::error::{ApprovalError, CryptoError};
use clavum_storage::StoreError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed input: missing reason, undecodable base64url, unknown tier.
    BadRequest(String),
    /// Missing, invalid, or stale signature; unknown identity. Never
    /// distinguishes among these externally.
    Unauthenticated,
    /// The authenticated identity is not the owner or participant.
    Forbidden(String),
    /// The targeted record does not exist.
    NotFound(String),
    /// Idempotency violation: duplicate name, approval already terminal.
    Conflict(String),
    /// This exact request signature has been observed before.
    Replayed,
    /// The approval's deadline has passed.
    Gone(String),
    /// Unexpected storage or I/O failure.
    Internal(String),
}

impl ApiError {
    /// Convenience constructor for internal failures.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "authentication required".to_owned(),
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Replayed => (
                StatusCode::CONFLICT,
                "replayed",
                "request signature already observed".to_owned(),
            ),
            Self::Gone(msg) => (StatusCode::GONE, "gone", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => Self::Conflict("record already exists".to_owned()),
            StoreError::Missing => Self::NotFound("record not found".to_owned()),
            StoreError::Conflict => Self::Conflict("record already resolved".to_owned()),
            StoreError::Backend { reason } => Self::Internal(reason),
        }
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound => Self::NotFound("approval not found".to_owned()),
            ApprovalError::AlreadyResolved(status) => {
                Self::Conflict(format!("approval already resolved as {status}"))
            }
            ApprovalError::Expired => Self::Gone("approval expired".to_owned()),
            ApprovalError::InvalidSignature => {
                Self::BadRequest("approval signature is invalid".to_owned())
            }
            ApprovalError::Store(inner) => inner.into(),
        }
    }
}

impl From<CryptoError> for ApiError {
    // Server-side crypto failures default to internal; paths where client
    // input is at fault map to BadRequest explicitly at the call site.
    fn from(_: CryptoError) -> Self {
        Self::Internal("cryptographic operation failed".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(status_of(ApiError::BadRequest(String::new())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ApiError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ApiError::Forbidden(String::new())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(ApiError::NotFound(String::new())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ApiError::Conflict(String::new())), StatusCode::CONFLICT);
        assert_eq!(status_of(ApiError::Replayed), StatusCode::CONFLICT);
        assert_eq!(status_of(ApiError::Gone(String::new())), StatusCode::GONE);
        assert_eq!(
            status_of(ApiError::Internal(String::new())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn approval_errors_map_to_http_codes() {
        use clavum_storage::models::ApprovalStatus;

        assert_eq!(status_of(ApprovalError::NotFound.into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ApprovalError::AlreadyResolved(ApprovalStatus::Denied).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ApprovalError::Expired.into()), StatusCode::GONE);
        assert_eq!(
            status_of(ApprovalError::InvalidSignature.into()),
            StatusCode::BAD_REQUEST
        );
    }
}
