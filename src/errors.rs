//! Error taxonomy shared by every core operation.
//!
//! Handlers return `Result<_, ApiError>`; the `IntoResponse` impl maps each
//! variant to its HTTP status and a structured `{"error": ...}` body, so the
//! REST layer never formats errors ad hoc.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed input — user-correctable.
    #[error("{0}")]
    Validation(String),
    /// Role or ownership mismatch.
    #[error("{0}")]
    Authorization(String),
    /// Entity absent.
    #[error("{0}")]
    NotFound(String),
    /// Valid entity, wrong lifecycle state.
    #[error("{0}")]
    InvalidState(String),
    /// Would violate a uniqueness invariant.
    #[error("{0}")]
    Conflict(String),
    /// No counselor available for assignment — non-fatal.
    #[error("{0}")]
    NoCapacity(String),
    /// Store failure on a primary write. Logged, never silently swallowed.
    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),
    /// An external collaborator (assistant upstream) failed.
    #[error("{0}")]
    Dependency(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidState(_) | ApiError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NoCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Persistence(_) | ApiError::Dependency(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Map a sqlx error from an INSERT guarded by a uniqueness constraint.
    ///
    /// SQLite reports partial-unique-index hits as a constraint violation;
    /// everything else stays a persistence failure.
    pub fn conflict_on_unique(e: sqlx::Error, message: &str) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::Conflict(message.to_string())
            }
            _ => ApiError::Persistence(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal failures get logged with context; the body stays generic.
        let body = match &self {
            ApiError::Persistence(e) => {
                error!(err = %e, "storage failure");
                "Internal server error".to_string()
            }
            ApiError::Dependency(msg) => {
                error!(err = %msg, "dependency failure");
                msg.clone()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": body }))).into_response()
    }
}
