//! StudioDesk server: contract lifecycle and e-signature workflow
//!
//! Library crate exposing the application state and router so integration
//! tests can drive the HTTP surface without binding a socket.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::ServiceConfig;
use crate::services::mailer::EmailSender;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    pub mailer: Arc<dyn EmailSender>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServiceConfig, mailer: Arc<dyn EmailSender>) -> Self {
        AppState {
            db,
            config: Arc::new(config),
            mailer,
            startup_time: Utc::now(),
        }
    }
}

/// Build the application router over the given state
pub fn build_router(state: AppState) -> axum::Router {
    api::build_router(state)
}
