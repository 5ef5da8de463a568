//! Append-only contract event trail and generic audit log
//!
//! These tables are only ever INSERTed into and SELECTed from; there is no
//! update or delete path anywhere in the codebase.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::ContractEvent;
use studio_common::{Error, Result};

/// Append one contract lifecycle event
pub async fn append_event(
    pool: &SqlitePool,
    contract_id: Uuid,
    event_type: &str,
    metadata: serde_json::Value,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    let metadata = serde_json::to_string(&metadata)
        .map_err(|e| Error::Mapping(format!("Failed to serialize metadata: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO contract_events (id, contract_id, event_type, metadata, ip_address, user_agent, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(contract_id.to_string())
    .bind(event_type)
    .bind(&metadata)
    .bind(ip_address)
    .bind(user_agent)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Ordered event trail for one contract
pub async fn list_events(pool: &SqlitePool, contract_id: Uuid) -> Result<Vec<ContractEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, contract_id, event_type, metadata, ip_address, user_agent, created_at
        FROM contract_events
        WHERE contract_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(contract_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let metadata: serde_json::Value =
                serde_json::from_str(&row.get::<String, _>("metadata"))
                    .map_err(|e| Error::Mapping(format!("Failed to parse metadata: {}", e)))?;
            Ok(ContractEvent {
                id: super::parse_uuid(&row.get::<String, _>("id"))?,
                contract_id: super::parse_uuid(&row.get::<String, _>("contract_id"))?,
                event_type: row.get("event_type"),
                metadata,
                ip_address: row.get("ip_address"),
                user_agent: row.get("user_agent"),
                created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
            })
        })
        .collect()
}

/// Count events of one type for one contract
pub async fn count_events(pool: &SqlitePool, contract_id: Uuid, event_type: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM contract_events WHERE contract_id = ? AND event_type = ?",
    )
    .bind(contract_id.to_string())
    .bind(event_type)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Append a generic audit entry
pub async fn append_audit(
    pool: &SqlitePool,
    entity_type: &str,
    entity_id: Uuid,
    action: &str,
    detail: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, entity_type, entity_id, action, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entity_type)
    .bind(entity_id.to_string())
    .bind(action)
    .bind(detail)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Audit entry projection for the admin trail endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEntry {
    pub action: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_audit(pool: &SqlitePool, entity_id: Uuid) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT action, detail, created_at FROM audit_log
        WHERE entity_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(entity_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(AuditEntry {
                action: row.get("action"),
                detail: row.get("detail"),
                created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_ordered_and_counted() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let contract_id = Uuid::new_v4();

        append_event(&pool, contract_id, "CREATED", serde_json::json!({}), None, None)
            .await
            .unwrap();
        append_event(
            &pool,
            contract_id,
            "SENT",
            serde_json::json!({"to": "jane@example.com"}),
            None,
            None,
        )
        .await
        .unwrap();
        append_event(
            &pool,
            contract_id,
            "SIGNED",
            serde_json::json!({}),
            Some("203.0.113.9"),
            Some("Mozilla/5.0"),
        )
        .await
        .unwrap();

        let events = list_events(&pool, contract_id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "CREATED");
        assert_eq!(events[2].event_type, "SIGNED");
        assert_eq!(events[2].ip_address.as_deref(), Some("203.0.113.9"));

        assert_eq!(count_events(&pool, contract_id, "SIGNED").await.unwrap(), 1);
        assert_eq!(count_events(&pool, contract_id, "VOIDED").await.unwrap(), 0);
    }
}
