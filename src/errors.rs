use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::cipher::CipherError;
use crate::lock::LockError;

/// Error type shared by the service layer. Handlers convert these into
/// structured JSON responses; nothing below the endpoint boundary talks
/// HTTP status codes directly.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("another upload is in progress; try again shortly")]
    Locked,

    #[error("incorrect password or corrupted data")]
    Decrypt,

    #[error(transparent)]
    Database(#[from] DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            // Wrong key and corrupted ciphertext are indistinguishable on
            // purpose; both read as an authentication problem.
            ServiceError::Decrypt => StatusCode::UNAUTHORIZED,
            ServiceError::Locked => StatusCode::LOCKED,
            ServiceError::Database(_) | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CipherError> for ServiceError {
    fn from(_: CipherError) -> Self {
        ServiceError::Decrypt
    }
}

impl From<LockError> for ServiceError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { .. } => ServiceError::Locked,
            LockError::Io(e) => ServiceError::Io(e),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {self}");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            ServiceError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::NotFound("missing".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServiceError::Locked.status_code(), StatusCode::LOCKED);
        assert_eq!(ServiceError::Decrypt.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn decrypt_error_does_not_name_a_cause() {
        let message = ServiceError::Decrypt.to_string();
        assert!(message.contains("incorrect password or corrupted data"));
    }
}
