//! Webhook endpoints and delivery records
//!
//! Deliveries are persisted rows so the retry sweep can resume after a
//! process restart: attempts and next_retry_at live in the database, not in
//! memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered webhook receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub url: String,

    /// Shared secret used to sign delivery payloads
    #[serde(skip_serializing)]
    pub secret: String,

    /// Dotted event names this endpoint subscribes to; `["*"]` means all
    pub event_types: Vec<String>,

    /// Per-attempt timeout
    pub timeout_ms: u64,

    pub max_attempts: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types
            .iter()
            .any(|t| t == "*" || t == event_type)
    }
}

/// Delivery attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DeliveryStatus::Pending),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "FAILED" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One enqueued event delivery to one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_subscription_matches_everything() {
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            url: "https://hooks.example.com/studio".into(),
            secret: "s".into(),
            event_types: vec!["*".into()],
            timeout_ms: 10_000,
            max_attempts: 5,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(endpoint.subscribes_to("contract.signed"));
        assert!(endpoint.subscribes_to("envelope.completed"));
    }

    #[test]
    fn explicit_subscription_filters() {
        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4(),
            url: "https://hooks.example.com/studio".into(),
            secret: "s".into(),
            event_types: vec!["contract.signed".into(), "contract.declined".into()],
            timeout_ms: 10_000,
            max_attempts: 5,
            is_active: true,
            created_at: Utc::now(),
        };
        assert!(endpoint.subscribes_to("contract.signed"));
        assert!(!endpoint.subscribes_to("contract.sent"));
    }
}
