//! Admin API-key management and validation
//!
//! Admin routes are gated by a single API key stored in the `settings` table:
//! - Key: `admin_api_key`
//! - Special value `0`: disables auth checking entirely (local dev / tests)
//! - Generated on first use if absent
//!
//! This module contains only pure functions and database operations. No HTTP
//! framework dependencies; route middleware lives in the server crate.

use sha2::{Digest, Sha256};

#[cfg(feature = "sqlx")]
use sqlx::SqlitePool;

/// Sentinel value that disables admin auth checking
pub const AUTH_DISABLED: &str = "0";

/// Authentication error types
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No API key header supplied
    MissingKey,

    /// Supplied key does not match the stored key
    InvalidKey,

    /// Database error loading the stored key
    DatabaseError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingKey => write!(f, "Missing API key"),
            AuthError::InvalidKey => write!(f, "Invalid API key"),
            AuthError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl std::error::Error for AuthError {}

/// Load the admin API key from the settings table, generating one if absent.
#[cfg(feature = "sqlx")]
pub async fn load_admin_key(db: &SqlitePool) -> Result<String, AuthError> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = 'admin_api_key'")
            .fetch_optional(db)
            .await
            .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    match result {
        Some((value,)) => Ok(value),
        None => initialize_admin_key(db).await,
    }
}

/// Generate and store a fresh admin API key (32 random bytes, hex-encoded).
#[cfg(feature = "sqlx")]
pub async fn initialize_admin_key(db: &SqlitePool) -> Result<String, AuthError> {
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();

    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('admin_api_key', ?)")
        .bind(&key)
        .execute(db)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    Ok(key)
}

/// Validate a supplied API key against the stored key.
///
/// Comparison is over SHA-256 digests so the check is constant-time with
/// respect to the stored key's contents.
pub fn validate_key(stored: &str, supplied: Option<&str>) -> Result<(), AuthError> {
    if stored == AUTH_DISABLED {
        // Auth disabled - pass through without validation
        return Ok(());
    }

    let supplied = supplied.ok_or(AuthError::MissingKey)?;

    let stored_digest = Sha256::digest(stored.as_bytes());
    let supplied_digest = Sha256::digest(supplied.as_bytes());

    if stored_digest == supplied_digest {
        Ok(())
    } else {
        Err(AuthError::InvalidKey)
    }
}
