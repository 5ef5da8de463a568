//! Contract template persistence
//!
//! Templates are soft-deactivated, never physically removed: existing
//! contracts keep referencing them by id.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{ContractTemplate, TemplateSection};
use studio_common::{Error, Result};

pub async fn insert_template(pool: &SqlitePool, template: &ContractTemplate) -> Result<()> {
    let schema = serde_json::to_string(&template.variables_schema)
        .map_err(|e| Error::Mapping(format!("Failed to serialize schema: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO contract_templates (
            id, name, description, event_type, body_html, variables_schema,
            is_active, is_published, version, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(template.id.to_string())
    .bind(&template.name)
    .bind(&template.description)
    .bind(&template.event_type)
    .bind(&template.body_html)
    .bind(&schema)
    .bind(template.is_active as i64)
    .bind(template.is_published as i64)
    .bind(template.version)
    .bind(template.created_at.to_rfc3339())
    .bind(template.updated_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_template(pool: &SqlitePool, id: Uuid) -> Result<Option<ContractTemplate>> {
    let row = sqlx::query("SELECT * FROM contract_templates WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(map_template).transpose()
}

/// Name uniqueness is enforced among active templates only
pub async fn active_template_name_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM contract_templates WHERE name = ? AND is_active = 1",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn list_templates(pool: &SqlitePool) -> Result<Vec<ContractTemplate>> {
    let rows = sqlx::query("SELECT * FROM contract_templates ORDER BY name")
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(map_template).collect()
}

pub async fn deactivate_template(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE contract_templates SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn map_template(row: sqlx::sqlite::SqliteRow) -> Result<ContractTemplate> {
    let schema: Vec<TemplateSection> =
        serde_json::from_str(&row.get::<String, _>("variables_schema"))
            .map_err(|e| Error::Mapping(format!("Failed to parse schema: {}", e)))?;

    Ok(ContractTemplate {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        description: row.get("description"),
        event_type: row.get("event_type"),
        body_html: row.get("body_html"),
        variables_schema: schema,
        is_active: row.get::<i64, _>("is_active") != 0,
        is_published: row.get::<i64, _>("is_published") != 0,
        version: row.get("version"),
        created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: super::parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}
