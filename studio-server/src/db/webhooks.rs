//! Webhook endpoint and delivery persistence
//!
//! Delivery rows carry attempts and next_retry_at so the retry sweep can
//! resume where it left off after a process restart.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{DeliveryStatus, WebhookDelivery, WebhookEndpoint};
use studio_common::{Error, Result};

pub async fn insert_endpoint(pool: &SqlitePool, endpoint: &WebhookEndpoint) -> Result<()> {
    let event_types = serde_json::to_string(&endpoint.event_types)
        .map_err(|e| Error::Mapping(format!("Failed to serialize event types: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO webhook_endpoints (id, url, secret, event_types, timeout_ms, max_attempts, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(endpoint.id.to_string())
    .bind(&endpoint.url)
    .bind(&endpoint.secret)
    .bind(&event_types)
    .bind(endpoint.timeout_ms as i64)
    .bind(endpoint.max_attempts)
    .bind(endpoint.is_active as i64)
    .bind(endpoint.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_endpoint(pool: &SqlitePool, id: Uuid) -> Result<Option<WebhookEndpoint>> {
    let row = sqlx::query("SELECT * FROM webhook_endpoints WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(map_endpoint).transpose()
}

pub async fn list_active_endpoints(pool: &SqlitePool) -> Result<Vec<WebhookEndpoint>> {
    let rows = sqlx::query("SELECT * FROM webhook_endpoints WHERE is_active = 1")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(map_endpoint).collect()
}

pub async fn list_endpoints(pool: &SqlitePool) -> Result<Vec<WebhookEndpoint>> {
    let rows = sqlx::query("SELECT * FROM webhook_endpoints ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(map_endpoint).collect()
}

pub async fn insert_delivery(pool: &SqlitePool, delivery: &WebhookDelivery) -> Result<()> {
    let payload = serde_json::to_string(&delivery.payload)
        .map_err(|e| Error::Mapping(format!("Failed to serialize payload: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO webhook_deliveries (
            id, endpoint_id, event_type, payload, status, attempts,
            next_retry_at, last_error, delivered_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(delivery.id.to_string())
    .bind(delivery.endpoint_id.to_string())
    .bind(&delivery.event_type)
    .bind(&payload)
    .bind(delivery.status.as_str())
    .bind(delivery.attempts)
    .bind(delivery.next_retry_at.map(|t| t.to_rfc3339()))
    .bind(&delivery.last_error)
    .bind(delivery.delivered_at.map(|t| t.to_rfc3339()))
    .bind(delivery.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Pending deliveries whose retry time has arrived
pub async fn list_due_deliveries(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WebhookDelivery>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM webhook_deliveries
        WHERE status = 'PENDING' AND next_retry_at IS NOT NULL AND next_retry_at <= ?
        ORDER BY next_retry_at
        LIMIT ?
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(map_delivery).collect()
}

pub async fn list_deliveries_for_endpoint(
    pool: &SqlitePool,
    endpoint_id: Uuid,
) -> Result<Vec<WebhookDelivery>> {
    let rows = sqlx::query(
        "SELECT * FROM webhook_deliveries WHERE endpoint_id = ? ORDER BY created_at DESC",
    )
    .bind(endpoint_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(map_delivery).collect()
}

pub async fn mark_delivered(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries SET
            status = 'DELIVERED', delivered_at = ?, next_retry_at = NULL, last_error = NULL
        WHERE id = ?
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed attempt. Keeps the delivery PENDING with a retry time, or
/// marks it FAILED (next_retry_at cleared) once attempts are exhausted.
pub async fn record_failure(
    pool: &SqlitePool,
    id: Uuid,
    attempts: i64,
    error: &str,
    next_retry_at: Option<DateTime<Utc>>,
) -> Result<()> {
    match next_retry_at {
        Some(retry_at) => {
            sqlx::query(
                r#"
                UPDATE webhook_deliveries SET attempts = ?, last_error = ?, next_retry_at = ?
                WHERE id = ?
                "#,
            )
            .bind(attempts)
            .bind(error)
            .bind(retry_at.to_rfc3339())
            .bind(id.to_string())
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                UPDATE webhook_deliveries SET
                    status = 'FAILED', attempts = ?, last_error = ?, next_retry_at = NULL
                WHERE id = ?
                "#,
            )
            .bind(attempts)
            .bind(error)
            .bind(id.to_string())
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

fn map_endpoint(row: sqlx::sqlite::SqliteRow) -> Result<WebhookEndpoint> {
    let event_types: Vec<String> = serde_json::from_str(&row.get::<String, _>("event_types"))
        .map_err(|e| Error::Mapping(format!("Failed to parse event types: {}", e)))?;

    Ok(WebhookEndpoint {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        url: row.get("url"),
        secret: row.get("secret"),
        event_types,
        timeout_ms: row.get::<i64, _>("timeout_ms") as u64,
        max_attempts: row.get("max_attempts"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn map_delivery(row: sqlx::sqlite::SqliteRow) -> Result<WebhookDelivery> {
    let status_str: String = row.get("status");
    let payload: serde_json::Value = serde_json::from_str(&row.get::<String, _>("payload"))
        .map_err(|e| Error::Mapping(format!("Failed to parse payload: {}", e)))?;

    Ok(WebhookDelivery {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        endpoint_id: super::parse_uuid(&row.get::<String, _>("endpoint_id"))?,
        event_type: row.get("event_type"),
        payload,
        status: DeliveryStatus::parse(&status_str)
            .ok_or_else(|| Error::Mapping(format!("Unknown delivery status '{}'", status_str)))?,
        attempts: row.get("attempts"),
        next_retry_at: super::parse_ts_opt(row.get("next_retry_at"))?,
        last_error: row.get("last_error"),
        delivered_at: super::parse_ts_opt(row.get("delivered_at"))?,
        created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
    })
}
