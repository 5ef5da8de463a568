//! Contract persistence and conditional status transitions
//!
//! Every lifecycle transition here is a single `UPDATE ... WHERE id = ? AND
//! status = <expected>` checked for affected-row count. Two concurrent
//! requests racing the same transition cannot both observe one affected row,
//! so the loser surfaces as an invalid-state error instead of silently
//! double-applying.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Contract, ContractStatus};
use studio_common::{Error, Result};

pub async fn insert_contract(pool: &SqlitePool, contract: &Contract) -> Result<()> {
    let variables = serde_json::to_string(&contract.variables)
        .map_err(|e| Error::Mapping(format!("Failed to serialize variables: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO contracts (
            id, contract_number, title, client_id, template_id, proposal_id,
            status, body_html, variables, sign_by_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(contract.id.to_string())
    .bind(&contract.contract_number)
    .bind(&contract.title)
    .bind(contract.client_id.to_string())
    .bind(contract.template_id.to_string())
    .bind(contract.proposal_id.map(|id| id.to_string()))
    .bind(contract.status.as_str())
    .bind(&contract.body_html)
    .bind(&variables)
    .bind(contract.sign_by_at.map(|t| t.to_rfc3339()))
    .bind(contract.created_at.to_rfc3339())
    .bind(contract.updated_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_contract(pool: &SqlitePool, id: Uuid) -> Result<Option<Contract>> {
    let row = sqlx::query("SELECT * FROM contracts WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(map_contract).transpose()
}

pub async fn get_contract_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Contract>> {
    let row = sqlx::query("SELECT * FROM contracts WHERE magic_link_token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    row.map(map_contract).transpose()
}

pub async fn list_contracts(pool: &SqlitePool) -> Result<Vec<Contract>> {
    let rows = sqlx::query("SELECT * FROM contracts ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(map_contract).collect()
}

/// DRAFT → SENT: record the rendered snapshot, magic link and optional PDF.
pub async fn mark_sent(
    pool: &SqlitePool,
    id: Uuid,
    body_html: &str,
    token: &str,
    link_expires_at: DateTime<Utc>,
    pdf_path: Option<&str>,
    pdf_hash: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            status = 'SENT',
            body_html = ?,
            magic_link_token = ?,
            magic_link_expires_at = ?,
            pdf_path = COALESCE(?, pdf_path),
            pdf_hash = COALESCE(?, pdf_hash),
            sent_at = ?,
            updated_at = ?
        WHERE id = ? AND status = 'DRAFT'
        "#,
    )
    .bind(body_html)
    .bind(token)
    .bind(link_expires_at.to_rfc3339())
    .bind(pdf_path)
    .bind(pdf_hash)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// SENT → VIEWED: first token redemption opens the signer session.
///
/// viewed_at is only ever set once; the conditional `status = 'SENT'` guard
/// means a second redemption takes the already-VIEWED branch in the service.
pub async fn open_session(
    pool: &SqlitePool,
    id: Uuid,
    session_id: &str,
    session_expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            status = 'VIEWED',
            viewed_at = COALESCE(viewed_at, ?),
            signer_session_id = ?,
            signer_session_expires_at = ?,
            otp_code = NULL,
            otp_expires_at = NULL,
            updated_at = ?
        WHERE id = ? AND status = 'SENT'
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(session_id)
    .bind(session_expires_at.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Re-issue the signer session on a VIEWED contract (repeat link redemption
/// while the previous session is still honored)
pub async fn refresh_session(
    pool: &SqlitePool,
    id: Uuid,
    session_id: &str,
    session_expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            signer_session_id = ?,
            signer_session_expires_at = ?,
            updated_at = ?
        WHERE id = ? AND status = 'VIEWED'
        "#,
    )
    .bind(session_id)
    .bind(session_expires_at.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Store a freshly minted OTP code for a SENT contract
pub async fn set_otp(
    pool: &SqlitePool,
    id: Uuid,
    code: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET otp_code = ?, otp_expires_at = ?, updated_at = ?
        WHERE id = ? AND status = 'SENT'
        "#,
    )
    .bind(code)
    .bind(expires_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Mint a fresh magic link for an outstanding contract (admin resend after
/// the original link lapsed)
pub async fn refresh_magic_link(
    pool: &SqlitePool,
    id: Uuid,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            magic_link_token = ?,
            magic_link_expires_at = ?,
            updated_at = ?
        WHERE id = ? AND status IN ('SENT', 'VIEWED')
        "#,
    )
    .bind(token)
    .bind(expires_at.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// VIEWED → SIGNED, guarded by the signer session. Clears the session
/// (single-use) and records signer identity and the stamped artifact.
#[allow(clippy::too_many_arguments)]
pub async fn mark_signed(
    pool: &SqlitePool,
    id: Uuid,
    session_id: &str,
    signer_name: &str,
    signer_email: &str,
    pdf_path: Option<&str>,
    pdf_hash: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            status = 'SIGNED',
            signed_at = ?,
            signer_name = ?,
            signer_email = ?,
            pdf_path = COALESCE(?, pdf_path),
            pdf_hash = COALESCE(?, pdf_hash),
            signer_session_id = NULL,
            signer_session_expires_at = NULL,
            updated_at = ?
        WHERE id = ? AND status = 'VIEWED' AND signer_session_id = ?
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(signer_name)
    .bind(signer_email)
    .bind(pdf_path)
    .bind(pdf_hash)
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// VIEWED → DECLINED, guarded by the signer session
pub async fn mark_declined(
    pool: &SqlitePool,
    id: Uuid,
    session_id: &str,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            status = 'DECLINED',
            declined_at = ?,
            voided_reason = ?,
            signer_session_id = NULL,
            signer_session_expires_at = NULL,
            updated_at = ?
        WHERE id = ? AND status = 'VIEWED' AND signer_session_id = ?
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(reason)
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Any non-terminal state → VOIDED (explicit admin action)
pub async fn mark_voided(
    pool: &SqlitePool,
    id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            status = 'VOIDED',
            voided_at = ?,
            voided_reason = ?,
            signer_session_id = NULL,
            signer_session_expires_at = NULL,
            updated_at = ?
        WHERE id = ? AND status IN ('DRAFT', 'SENT', 'VIEWED')
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(reason)
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Any non-terminal state → EXPIRED (background sweep)
pub async fn mark_expired(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE contracts SET
            status = 'EXPIRED',
            signer_session_id = NULL,
            signer_session_expires_at = NULL,
            updated_at = ?
        WHERE id = ? AND status IN ('DRAFT', 'SENT', 'VIEWED')
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Non-terminal contracts whose deadline or magic link has lapsed
pub async fn list_expiry_candidates(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Contract>> {
    let now_str = now.to_rfc3339();
    let rows = sqlx::query(
        r#"
        SELECT * FROM contracts
        WHERE status IN ('SENT', 'VIEWED')
          AND (
                (sign_by_at IS NOT NULL AND sign_by_at < ?)
             OR (magic_link_expires_at IS NOT NULL AND magic_link_expires_at < ?)
          )
        "#,
    )
    .bind(&now_str)
    .bind(&now_str)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(map_contract).collect()
}

/// SENT/VIEWED contracts whose deadline falls inside the reminder window and
/// that have not been reminded yet
pub async fn list_reminder_candidates(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<Contract>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM contracts
        WHERE status IN ('SENT', 'VIEWED')
          AND reminder_sent_at IS NULL
          AND sign_by_at IS NOT NULL
          AND sign_by_at > ?
          AND sign_by_at <= ?
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(window_end.to_rfc3339())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(map_contract).collect()
}

pub async fn mark_reminder_sent(pool: &SqlitePool, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE contracts SET reminder_sent_at = ? WHERE id = ?")
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn map_contract(row: sqlx::sqlite::SqliteRow) -> Result<Contract> {
    let status_str: String = row.get("status");
    let status = ContractStatus::parse(&status_str)
        .ok_or_else(|| Error::Mapping(format!("Unknown contract status '{}'", status_str)))?;

    let variables: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&row.get::<String, _>("variables"))
            .map_err(|e| Error::Mapping(format!("Failed to parse variables: {}", e)))?;

    let proposal_id = row
        .get::<Option<String>, _>("proposal_id")
        .as_deref()
        .map(super::parse_uuid)
        .transpose()?;

    Ok(Contract {
        id: super::parse_uuid(&row.get::<String, _>("id"))?,
        contract_number: row.get("contract_number"),
        title: row.get("title"),
        client_id: super::parse_uuid(&row.get::<String, _>("client_id"))?,
        template_id: super::parse_uuid(&row.get::<String, _>("template_id"))?,
        proposal_id,
        status,
        body_html: row.get("body_html"),
        variables,
        pdf_path: row.get("pdf_path"),
        pdf_hash: row.get("pdf_hash"),
        sign_by_at: super::parse_ts_opt(row.get("sign_by_at"))?,
        magic_link_token: row.get("magic_link_token"),
        magic_link_expires_at: super::parse_ts_opt(row.get("magic_link_expires_at"))?,
        otp_code: row.get("otp_code"),
        otp_expires_at: super::parse_ts_opt(row.get("otp_expires_at"))?,
        signer_session_id: row.get("signer_session_id"),
        signer_session_expires_at: super::parse_ts_opt(row.get("signer_session_expires_at"))?,
        sent_at: super::parse_ts_opt(row.get("sent_at"))?,
        viewed_at: super::parse_ts_opt(row.get("viewed_at"))?,
        signed_at: super::parse_ts_opt(row.get("signed_at"))?,
        declined_at: super::parse_ts_opt(row.get("declined_at"))?,
        voided_at: super::parse_ts_opt(row.get("voided_at"))?,
        voided_reason: row.get("voided_reason"),
        signer_name: row.get("signer_name"),
        signer_email: row.get("signer_email"),
        created_at: super::parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: super::parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}
