//! Settings table access and the contract-number sequence

use sqlx::SqlitePool;
use studio_common::{Error, Result};

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically advance the contract-number counter and return the new value.
///
/// The upsert-with-RETURNING form makes concurrent callers see distinct
/// sequence numbers without an application-side lock.
pub async fn next_contract_seq(pool: &SqlitePool) -> Result<i64> {
    let value: String = sqlx::query_scalar(
        r#"
        INSERT INTO settings (key, value) VALUES ('contract_seq', '1')
        ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1
        RETURNING value
        "#,
    )
    .fetch_one(pool)
    .await?;

    value
        .parse::<i64>()
        .map_err(|e| Error::Mapping(format!("Invalid contract_seq '{}': {}", value, e)))
}

/// Format a sequence number as a human-readable contract number
pub fn format_contract_number(year: i32, seq: i64) -> String {
    format!("CT-{}-{:04}", year, seq)
}
