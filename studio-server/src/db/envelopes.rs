//! Envelope, signer and signature persistence
//!
//! Per-signer transitions use the same conditional-update idiom as contracts:
//! `WHERE status = 'PENDING'` guarded updates checked for affected rows.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Envelope, EnvelopeMode, EnvelopeStatus, Signer, SignerStatus};
use studio_common::{Error, Result};

pub async fn insert_envelope(pool: &SqlitePool, envelope: &Envelope) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO envelopes (id, title, mode, status, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(envelope.id.to_string())
    .bind(&envelope.title)
    .bind(envelope.mode.as_str())
    .bind(envelope.status.as_str())
    .bind(envelope.expires_at.map(|t| t.to_rfc3339()))
    .bind(envelope.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_signer(pool: &SqlitePool, signer: &Signer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO envelope_signers (
            id, envelope_id, name, email, role, sequence_number,
            token, token_expires_at, status, acted_at, decline_reason
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(signer.id.to_string())
    .bind(signer.envelope_id.to_string())
    .bind(&signer.name)
    .bind(&signer.email)
    .bind(&signer.role)
    .bind(signer.sequence_number)
    .bind(&signer.token)
    .bind(signer.token_expires_at.map(|t| t.to_rfc3339()))
    .bind(signer.status.as_str())
    .bind(signer.acted_at.map(|t| t.to_rfc3339()))
    .bind(&signer.decline_reason)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_envelope(pool: &SqlitePool, id: Uuid) -> Result<Option<Envelope>> {
    let row = sqlx::query("SELECT * FROM envelopes WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(map_envelope).transpose()
}

pub async fn get_signer_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Signer>> {
    let row = sqlx::query("SELECT * FROM envelope_signers WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    row.map(map_signer).transpose()
}

/// All signers of an envelope in sequence order
pub async fn list_signers(pool: &SqlitePool, envelope_id: Uuid) -> Result<Vec<Signer>> {
    let rows = sqlx::query(
        "SELECT * FROM envelope_signers WHERE envelope_id = ? ORDER BY sequence_number",
    )
    .bind(envelope_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(map_signer).collect()
}

/// Mint a signer's token at envelope send
pub async fn set_signer_token(
    pool: &SqlitePool,
    signer_id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE envelope_signers SET token = ?, token_expires_at = ? WHERE id = ?")
        .bind(token)
        .bind(expires_at.to_rfc3339())
        .bind(signer_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// PENDING → SIGNED for one signer
pub async fn mark_signer_signed(
    pool: &SqlitePool,
    signer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE envelope_signers SET status = 'SIGNED', acted_at = ?, token = NULL
        WHERE id = ? AND status = 'PENDING'
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(signer_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// PENDING → DECLINED for one signer
pub async fn mark_signer_declined(
    pool: &SqlitePool,
    signer_id: Uuid,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE envelope_signers SET status = 'DECLINED', acted_at = ?, decline_reason = ?, token = NULL
        WHERE id = ? AND status = 'PENDING'
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(reason)
    .bind(signer_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Store the captured signature (one per signer)
pub async fn insert_signature(
    pool: &SqlitePool,
    signer_id: Uuid,
    envelope_id: Uuid,
    signature_data_url: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO envelope_signatures (signer_id, envelope_id, signature_data_url, signed_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(signer_id.to_string())
    .bind(envelope_id.to_string())
    .bind(signature_data_url)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Move a PENDING envelope to a terminal status; loses the race if another
/// request already finished the envelope.
pub async fn set_envelope_status(
    pool: &SqlitePool,
    id: Uuid,
    status: EnvelopeStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE envelopes SET status = ? WHERE id = ? AND status = 'PENDING'")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

fn map_envelope(row: sqlx::sqlite::SqliteRow) -> Result<Envelope> {
    let mode_str: String = row.get("mode");
    let status_str: String = row.get("status");
    Ok(Envelope {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        title: row.get("title"),
        mode: EnvelopeMode::parse(&mode_str)
            .ok_or_else(|| Error::Mapping(format!("Unknown envelope mode '{}'", mode_str)))?,
        status: EnvelopeStatus::parse(&status_str)
            .ok_or_else(|| Error::Mapping(format!("Unknown envelope status '{}'", status_str)))?,
        expires_at: super::parse_ts_opt(row.get("expires_at"))?,
        created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn map_signer(row: sqlx::sqlite::SqliteRow) -> Result<Signer> {
    let status_str: String = row.get("status");
    Ok(Signer {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        envelope_id: super::parse_uuid(&row.get::<String, _>("envelope_id"))?,
        name: row.get("name"),
        email: row.get("email"),
        role: row.get("role"),
        sequence_number: row.get("sequence_number"),
        token: row.get("token"),
        token_expires_at: super::parse_ts_opt(row.get("token_expires_at"))?,
        status: SignerStatus::parse(&status_str)
            .ok_or_else(|| Error::Mapping(format!("Unknown signer status '{}'", status_str)))?,
        acted_at: super::parse_ts_opt(row.get("acted_at"))?,
        decline_reason: row.get("decline_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(envelope_id: Uuid, seq: i64) -> Signer {
        Signer {
            id: Uuid::new_v4(),
            envelope_id,
            name: format!("Signer {}", seq),
            email: format!("signer{}@example.com", seq),
            role: None,
            sequence_number: seq,
            token: None,
            token_expires_at: None,
            status: SignerStatus::Pending,
            acted_at: None,
            decline_reason: None,
        }
    }

    #[tokio::test]
    async fn signer_transitions_are_single_use() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let envelope = Envelope {
            id: Uuid::new_v4(),
            title: "Venue + couple".into(),
            mode: EnvelopeMode::Sequential,
            status: EnvelopeStatus::Pending,
            expires_at: None,
            created_at: Utc::now(),
        };
        insert_envelope(&pool, &envelope).await.unwrap();

        let s1 = signer(envelope.id, 1);
        insert_signer(&pool, &s1).await.unwrap();

        let now = Utc::now();
        assert!(mark_signer_signed(&pool, s1.id, now).await.unwrap());
        assert!(!mark_signer_signed(&pool, s1.id, now).await.unwrap());
        assert!(!mark_signer_declined(&pool, s1.id, None, now).await.unwrap());

        let signers = list_signers(&pool, envelope.id).await.unwrap();
        assert_eq!(signers[0].status, SignerStatus::Signed);
        assert!(signers[0].token.is_none());
    }

    #[tokio::test]
    async fn envelope_status_update_is_conditional() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let envelope = Envelope {
            id: Uuid::new_v4(),
            title: "Parallel pair".into(),
            mode: EnvelopeMode::Parallel,
            status: EnvelopeStatus::Pending,
            expires_at: None,
            created_at: Utc::now(),
        };
        insert_envelope(&pool, &envelope).await.unwrap();

        assert!(set_envelope_status(&pool, envelope.id, EnvelopeStatus::Completed)
            .await
            .unwrap());
        assert!(!set_envelope_status(&pool, envelope.id, EnvelopeStatus::Declined)
            .await
            .unwrap());

        let loaded = get_envelope(&pool, envelope.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EnvelopeStatus::Completed);
    }
}
