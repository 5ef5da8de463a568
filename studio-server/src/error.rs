//! Error types for studio-server
//!
//! The taxonomy follows the contract workflow: not-found, invalid state,
//! token problems, validation, authorization, and integration failures.
//! Every variant maps to a stable machine-readable code in the JSON body so
//! the front end can branch without parsing messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Entity absent (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation not permitted from the current status (409)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Contract already carries a signature (409)
    #[error("Contract already signed")]
    AlreadySigned,

    /// Magic link past its expiry (410)
    #[error("Token expired")]
    TokenExpired,

    /// Magic link already exchanged and the session it opened has expired (410)
    #[error("Token already used")]
    TokenConsumed,

    /// Signer session missing, mismatched or expired (401)
    #[error("Invalid signer session")]
    InvalidSession,

    /// Terms checkbox not ticked (400)
    #[error("Terms must be agreed to sign")]
    TermsNotAgreed,

    /// Signature data URL malformed or wrong media type (400)
    #[error("Invalid signature image: {0}")]
    InvalidSignatureImage(String),

    /// Malformed input (400)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Signer email does not match the client on file (403)
    #[error("Signer email does not match client email")]
    EmailMismatch,

    /// Acting user lacks permission (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Signer out of turn in a sequential envelope (409)
    #[error("Signing order violation: {0}")]
    SigningOrderViolation(String),

    /// PDF stamping or other collaborator threw (502)
    #[error("Integration failure: {0}")]
    IntegrationFailure(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// studio-common error
    #[error(transparent)]
    Common(#[from] studio_common::Error),
}

impl ApiError {
    /// Machine-stable reason code for the JSON body
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::AlreadySigned => "ALREADY_SIGNED",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::TokenConsumed => "TOKEN_CONSUMED",
            ApiError::InvalidSession => "INVALID_SESSION",
            ApiError::TermsNotAgreed => "TERMS_NOT_AGREED",
            ApiError::InvalidSignatureImage(_) => "INVALID_SIGNATURE_IMAGE",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::EmailMismatch => "EMAIL_MISMATCH",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::SigningOrderViolation(_) => "SIGNING_ORDER_VIOLATION",
            ApiError::IntegrationFailure(_) => "INTEGRATION_FAILURE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Io(_) => "IO_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidState(_)
            | ApiError::AlreadySigned
            | ApiError::SigningOrderViolation(_) => StatusCode::CONFLICT,
            // 410 Gone distinguishes "link consumed/expired" from "wrong link"
            ApiError::TokenExpired | ApiError::TokenConsumed => StatusCode::GONE,
            ApiError::InvalidSession | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::EmailMismatch => StatusCode::FORBIDDEN,
            ApiError::TermsNotAgreed
            | ApiError::InvalidSignatureImage(_)
            | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::IntegrationFailure(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_)
            | ApiError::Io(_)
            | ApiError::Database(_)
            | ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::NotFound("contract".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::AlreadySigned.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::TokenExpired.status(), StatusCode::GONE);
        assert_eq!(ApiError::TokenConsumed.status(), StatusCode::GONE);
        assert_eq!(ApiError::InvalidSession.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::EmailMismatch.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::TermsNotAgreed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::IntegrationFailure("pdf".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::AlreadySigned.code(), "ALREADY_SIGNED");
        assert_eq!(ApiError::EmailMismatch.code(), "EMAIL_MISMATCH");
        assert_eq!(
            ApiError::SigningOrderViolation("signer 1 pending".into()).code(),
            "SIGNING_ORDER_VIOLATION"
        );
    }
}
