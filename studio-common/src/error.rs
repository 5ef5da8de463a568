//! Shared error type for the StudioDesk libraries
//!
//! Only the failures the storage and configuration layers can actually hit
//! live here; the server wraps this in its HTTP-facing `ApiError` and owns
//! the request-level taxonomy (not-found, token, validation, …).

use thiserror::Error;

/// Result alias for library-level operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data folder creation, config file reads, artifact writes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file present but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// A persisted value failed to encode or decode: a JSON column, a status
    /// or timestamp string, a stored UUID
    #[error("Data mapping error: {0}")]
    Mapping(String),
}
