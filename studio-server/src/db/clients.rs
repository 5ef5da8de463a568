//! Client record persistence

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Client;
use studio_common::Result;

pub async fn insert_client(pool: &SqlitePool, client: &Client) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO clients (id, name, email, phone, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(client.id.to_string())
    .bind(&client.name)
    .bind(&client.email)
    .bind(&client.phone)
    .bind(&client.notes)
    .bind(client.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_client(pool: &SqlitePool, id: Uuid) -> Result<Option<Client>> {
    let row = sqlx::query(
        "SELECT id, name, email, phone, notes, created_at FROM clients WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(map_client).transpose()
}

pub async fn list_clients(pool: &SqlitePool) -> Result<Vec<Client>> {
    let rows = sqlx::query(
        "SELECT id, name, email, phone, notes, created_at FROM clients ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(map_client).collect()
}

fn map_client(row: sqlx::sqlite::SqliteRow) -> Result<Client> {
    Ok(Client {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        notes: row.get("notes"),
        created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn insert_and_fetch() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let client = Client {
            id: Uuid::new_v4(),
            name: "Jane Doe".into(),
            email: "jane@example.com".into(),
            phone: Some("555-0100".into()),
            notes: None,
            created_at: Utc::now(),
        };
        insert_client(&pool, &client).await.unwrap();

        let loaded = get_client(&pool, client.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Jane Doe");
        assert_eq!(loaded.email, "jane@example.com");

        assert!(get_client(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }
}
