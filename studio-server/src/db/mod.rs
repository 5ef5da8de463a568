//! Database access for studio-server
//!
//! SQLite via sqlx. Schema is created idempotently at startup; all status
//! transitions are conditional updates guarded by the current status so a
//! lost race is detected by affected-row count rather than a lock.

pub mod clients;
pub mod contracts;
pub mod envelopes;
pub mod events;
pub mod settings;
pub mod templates;
pub mod webhooks;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use studio_common::{Error, Result};

/// Initialize database connection pool
///
/// Connects to studio.db inside the data folder, creating the file and all
/// tables on first run.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create all tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            notes TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contract_templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            event_type TEXT,
            body_html TEXT NOT NULL,
            variables_schema TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_published INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contracts (
            id TEXT PRIMARY KEY,
            contract_number TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            client_id TEXT NOT NULL REFERENCES clients(id),
            template_id TEXT NOT NULL REFERENCES contract_templates(id),
            proposal_id TEXT,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            body_html TEXT NOT NULL DEFAULT '',
            variables TEXT NOT NULL DEFAULT '{}',
            pdf_path TEXT,
            pdf_hash TEXT,
            sign_by_at TEXT,
            magic_link_token TEXT UNIQUE,
            magic_link_expires_at TEXT,
            otp_code TEXT,
            otp_expires_at TEXT,
            signer_session_id TEXT,
            signer_session_expires_at TEXT,
            sent_at TEXT,
            viewed_at TEXT,
            signed_at TEXT,
            declined_at TEXT,
            voided_at TEXT,
            voided_reason TEXT,
            signer_name TEXT,
            signer_email TEXT,
            reminder_sent_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only: no UPDATE or DELETE is ever issued against these two
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contract_events (
            id TEXT PRIMARY KEY,
            contract_id TEXT NOT NULL REFERENCES contracts(id),
            event_type TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            ip_address TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            action TEXT NOT NULL,
            detail TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS envelopes (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            expires_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS envelope_signers (
            id TEXT PRIMARY KEY,
            envelope_id TEXT NOT NULL REFERENCES envelopes(id),
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            role TEXT,
            sequence_number INTEGER NOT NULL,
            token TEXT UNIQUE,
            token_expires_at TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            acted_at TEXT,
            decline_reason TEXT,
            UNIQUE(envelope_id, sequence_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS envelope_signatures (
            signer_id TEXT PRIMARY KEY REFERENCES envelope_signers(id),
            envelope_id TEXT NOT NULL REFERENCES envelopes(id),
            signature_data_url TEXT NOT NULL,
            signed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_endpoints (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            secret TEXT NOT NULL,
            event_types TEXT NOT NULL DEFAULT '["*"]',
            timeout_ms INTEGER NOT NULL DEFAULT 10000,
            max_attempts INTEGER NOT NULL DEFAULT 5,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id TEXT PRIMARY KEY,
            endpoint_id TEXT NOT NULL REFERENCES webhook_endpoints(id),
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_retry_at TEXT,
            last_error TEXT,
            delivered_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Parse an RFC 3339 column value into a UTC timestamp
pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Mapping(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Parse an optional RFC 3339 column value
pub(crate) fn parse_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

/// Parse a TEXT uuid column value
pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| Error::Mapping(format!("Invalid uuid '{}': {}", value, e)))
}
