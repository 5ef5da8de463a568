//! # StudioDesk Common Library
//!
//! Shared code for the StudioDesk back-office service:
//! - Error types
//! - Configuration loading
//! - Admin API-key management and validation
//! - Domain event types (webhook payloads, audit metadata)

pub mod auth;
pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
