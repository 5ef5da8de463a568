//! Admin API-key middleware
//!
//! The key lives in the settings table (`admin_api_key`); the sentinel value
//! `0` disables the check for local development and tests. Key storage and
//! comparison live in `studio_common::auth`; this layer only adapts them to
//! axum middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::AppState;
use studio_common::auth::{self, AuthError};

/// Header carrying the admin API key
pub const API_KEY_HEADER: &str = "X-Api-Key";

pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let stored = auth::load_admin_key(&state.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let supplied = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    auth::validate_key(&stored, supplied).map_err(|e| match e {
        AuthError::MissingKey | AuthError::InvalidKey => ApiError::Unauthorized(e.to_string()),
        AuthError::DatabaseError(message) => ApiError::Internal(message),
    })?;

    Ok(next.run(request).await)
}
