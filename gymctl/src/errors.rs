use crate::{
    db::{errors::DbError, models::memberships::MembershipStatus, models::sessions::SessionStatus},
    types::{Operation, Resource},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, Error>;

/// User-facing error taxonomy. Everything except `Database` and `Internal`
/// is an expected, recoverable business-rule failure and is returned to the
/// caller as a typed JSON body with the policy numbers it needs to render.
#[derive(Debug, Error)]
pub enum Error {
    #[error("insufficient credits: {available} available, {requested} requested")]
    InsufficientCredits { available: i64, requested: i64 },

    #[error("freeze end date must be after the start date")]
    InvalidRange,

    #[error("membership is {status}, not ACTIVE")]
    NotActive { status: MembershipStatus },

    #[error("membership is {status}, not FROZEN")]
    NotFrozen { status: MembershipStatus },

    #[error("membership is already cancelled")]
    AlreadyCancelled,

    #[error("freeze quota exceeded: {used} of {max} freezes used in {year}")]
    FreezeQuotaExceeded { used: i32, max: i32, year: i32 },

    #[error("cannot {action} a session in state {from}")]
    InvalidTransition { from: SessionStatus, action: &'static str },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("permission denied: {operation} on {resource:?}")]
    InsufficientPermissions { resource: Resource, operation: Operation },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("database error")]
    Database(#[from] DbError),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InsufficientCredits { .. }
            | Error::NotActive { .. }
            | Error::NotFrozen { .. }
            | Error::AlreadyCancelled
            | Error::FreezeQuotaExceeded { .. }
            | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::InvalidRange | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Database(DbError::NotFound) => StatusCode::NOT_FOUND,
            Error::Database(DbError::CheckViolation { .. }) | Error::Database(DbError::UniqueViolation { .. }) => {
                StatusCode::CONFLICT
            }
            Error::Database(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the client.
    fn code(&self) -> &'static str {
        match self {
            Error::InsufficientCredits { .. } => "insufficient_credits",
            Error::InvalidRange => "invalid_range",
            Error::NotActive { .. } => "not_active",
            Error::NotFrozen { .. } => "not_frozen",
            Error::AlreadyCancelled => "already_cancelled",
            Error::FreezeQuotaExceeded { .. } => "freeze_quota_exceeded",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::InsufficientPermissions { .. } => "forbidden",
            Error::NotFound { .. } => "not_found",
            Error::BadRequest { .. } => "bad_request",
            Error::Database(_) => "database_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Never leak store internals to the client.
        let message = match &self {
            Error::Database(err) => {
                error!("database error: {err}");
                "internal database error".to_string()
            }
            Error::Internal(err) => {
                error!("internal error: {err:#}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
        });

        // Structured detail the client can render without parsing messages.
        match &self {
            Error::InsufficientCredits { available, requested } => {
                body["available"] = json!(available);
                body["requested"] = json!(requested);
            }
            Error::FreezeQuotaExceeded { used, max, year } => {
                body["used"] = json!(used);
                body["max"] = json!(max);
                body["year"] = json!(year);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_map_to_conflict() {
        let err = Error::InsufficientCredits {
            available: 1,
            requested: 2,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "insufficient_credits");

        assert_eq!(Error::AlreadyCancelled.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::FreezeQuotaExceeded { used: 2, max: 2, year: 2026 }.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn store_errors_are_internal() {
        let err = Error::Database(DbError::Sqlx(sqlx::Error::PoolClosed));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn quota_error_message_names_the_year() {
        let err = Error::FreezeQuotaExceeded { used: 3, max: 3, year: 2026 };
        let msg = err.to_string();
        assert!(msg.contains("3 of 3"));
        assert!(msg.contains("2026"));
    }
}
