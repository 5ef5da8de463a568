//! Webhook fan-out and retrying delivery
//!
//! Emitting an event is two separate steps: `enqueue_event` inserts one
//! delivery row per subscribed endpoint, and the background sweep posts due
//! rows with `run_due_deliveries`. Enqueueing is transactional with the
//! workflow that caused the event; actual HTTP happens off the request path.
//!
//! Failed attempts back off exponentially (base * 2^(attempt-1)) until the
//! endpoint's max attempts are exhausted, then the delivery is marked FAILED.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::db;
use crate::models::{DeliveryStatus, WebhookDelivery, WebhookEndpoint};
use studio_common::events::StudioEvent;
use studio_common::{Error, Result};

/// Hex SHA-256 of secret-prefixed body, sent with every delivery
pub const SIGNATURE_HEADER: &str = "X-Studio-Signature";

/// Dotted event name, so receivers can dispatch before parsing the body
pub const EVENT_HEADER: &str = "X-Studio-Event";

/// Compute the delivery signature: hex SHA-256 over secret then body
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Retry delay before attempt N+1, given N failed attempts so far
pub fn backoff(base_secs: i64, attempts: i64) -> Duration {
    let exponent = (attempts - 1).clamp(0, 16) as u32;
    Duration::seconds(base_secs.saturating_mul(1_i64 << exponent))
}

/// Queue one delivery per active endpoint subscribed to this event.
/// Returns the number of deliveries queued.
pub async fn enqueue_event(pool: &SqlitePool, event: &StudioEvent) -> Result<usize> {
    let event_type = event.event_type();
    let payload = serde_json::to_value(event)
        .map_err(|e| Error::Mapping(format!("Failed to serialize event: {}", e)))?;

    let endpoints = db::webhooks::list_active_endpoints(pool).await?;
    let now = Utc::now();
    let mut queued = 0;

    for endpoint in endpoints.iter().filter(|e| e.subscribes_to(event_type)) {
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            endpoint_id: endpoint.id,
            event_type: event_type.to_string(),
            payload: payload.clone(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_retry_at: Some(now),
            last_error: None,
            delivered_at: None,
            created_at: now,
        };
        db::webhooks::insert_delivery(pool, &delivery).await?;
        queued += 1;
    }

    if queued > 0 {
        tracing::debug!(event_type, queued, "Queued webhook deliveries");
    }
    Ok(queued)
}

/// POST one delivery to its endpoint
async fn attempt_delivery(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    delivery: &WebhookDelivery,
) -> std::result::Result<(), String> {
    let body = serde_json::to_string(&delivery.payload)
        .map_err(|e| format!("payload serialization: {}", e))?;
    let signature = sign_payload(&endpoint.secret, &body);

    let response = client
        .post(&endpoint.url)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_HEADER, &delivery.event_type)
        .timeout(std::time::Duration::from_millis(endpoint.timeout_ms))
        .body(body)
        .send()
        .await
        .map_err(|e| format!("request error: {}", e))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("HTTP {}", status.as_u16()))
    }
}

/// Post all due deliveries once. Returns the number delivered.
pub async fn run_due_deliveries(
    pool: &SqlitePool,
    client: &reqwest::Client,
    config: &ServiceConfig,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<usize> {
    let due = db::webhooks::list_due_deliveries(pool, now, limit).await?;
    let mut delivered = 0;

    for delivery in due {
        let endpoint = match db::webhooks::get_endpoint(pool, delivery.endpoint_id).await? {
            Some(endpoint) if endpoint.is_active => endpoint,
            Some(_) => {
                db::webhooks::record_failure(
                    pool,
                    delivery.id,
                    delivery.attempts + 1,
                    "endpoint deactivated",
                    None,
                )
                .await?;
                continue;
            }
            None => {
                db::webhooks::record_failure(
                    pool,
                    delivery.id,
                    delivery.attempts + 1,
                    "endpoint deleted",
                    None,
                )
                .await?;
                continue;
            }
        };

        match attempt_delivery(client, &endpoint, &delivery).await {
            Ok(()) => {
                db::webhooks::mark_delivered(pool, delivery.id, Utc::now()).await?;
                delivered += 1;
                tracing::info!(
                    delivery_id = %delivery.id,
                    url = %endpoint.url,
                    event_type = %delivery.event_type,
                    "Webhook delivered"
                );
            }
            Err(error) => {
                let attempts = delivery.attempts + 1;
                let next_retry_at = if attempts < endpoint.max_attempts {
                    Some(now + backoff(config.webhook_backoff_base_secs, attempts))
                } else {
                    None
                };
                tracing::warn!(
                    delivery_id = %delivery.id,
                    url = %endpoint.url,
                    attempts,
                    exhausted = next_retry_at.is_none(),
                    error = %error,
                    "Webhook delivery failed"
                );
                db::webhooks::record_failure(pool, delivery.id, attempts, &error, next_retry_at)
                    .await?;
            }
        }
    }

    Ok(delivered)
}
