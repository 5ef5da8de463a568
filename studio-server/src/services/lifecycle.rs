//! Contract lifecycle operations
//!
//! Create, send, view, session opening, OTP, void, and the background expiry
//! sweep. Signature capture and decline live in `services::signing`.
//!
//! All transitions go through the conditional updates in `db::contracts`; a
//! lost conditional update is reported as a state error, never retried.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Contract, ContractStatus};
use crate::services::mailer::{self, EmailMessage, EmailSender};
use crate::services::{pdf, renderer, tokens, webhooks};
use studio_common::events::StudioEvent;

/// Input for contract creation
#[derive(Debug)]
pub struct NewContract {
    pub template_id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub proposal_id: Option<Uuid>,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub sign_by_at: Option<DateTime<Utc>>,
}

/// What a signer sees after following the magic link
#[derive(Debug, Serialize)]
pub struct SignerView {
    pub contract_id: Uuid,
    pub contract_number: String,
    pub title: String,
    pub status: ContractStatus,
    pub body_html: String,
    pub client_name: String,
    pub sign_by_at: Option<DateTime<Utc>>,
    pub requires_otp: bool,
}

/// A freshly opened (or refreshed) signer session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub contract_id: Uuid,
}

async fn load_contract(pool: &SqlitePool, id: Uuid) -> ApiResult<Contract> {
    db::contracts::get_contract(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", id)))
}

/// Error for a terminal contract reached through a signer-facing route
fn terminal_error(status: ContractStatus) -> Option<ApiError> {
    match status {
        ContractStatus::Signed => Some(ApiError::AlreadySigned),
        ContractStatus::Expired => Some(ApiError::TokenExpired),
        ContractStatus::Declined | ContractStatus::Voided => Some(ApiError::InvalidState(
            format!("contract is {}", status.as_str()),
        )),
        _ => None,
    }
}

/// Create a DRAFT contract from an active template.
///
/// Schema defaults are folded into the variable bindings before the
/// required-field check, so a defaulted field is never reported missing.
pub async fn create_contract(pool: &SqlitePool, input: NewContract) -> ApiResult<Contract> {
    let template = db::templates::get_template(pool, input.template_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", input.template_id)))?;
    if !template.is_active {
        return Err(ApiError::ValidationError("template is deactivated".into()));
    }

    db::clients::get_client(pool, input.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", input.client_id)))?;

    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::ValidationError("title must not be empty".into()));
    }

    let now = Utc::now();
    if let Some(deadline) = input.sign_by_at {
        if deadline <= now {
            return Err(ApiError::ValidationError(
                "sign_by_at must be in the future".into(),
            ));
        }
    }

    let mut variables = input.variables;
    for field in template.fields() {
        if let Some(default) = &field.default {
            variables
                .entry(field.name.clone())
                .or_insert_with(|| default.clone());
        }
    }
    let missing = template.missing_required_fields(&variables);
    if !missing.is_empty() {
        return Err(ApiError::ValidationError(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let seq = db::settings::next_contract_seq(pool).await?;
    let contract = Contract {
        id: Uuid::new_v4(),
        contract_number: db::settings::format_contract_number(now.year(), seq),
        title,
        client_id: input.client_id,
        template_id: template.id,
        proposal_id: input.proposal_id,
        status: ContractStatus::Draft,
        body_html: String::new(),
        variables,
        pdf_path: None,
        pdf_hash: None,
        sign_by_at: input.sign_by_at,
        magic_link_token: None,
        magic_link_expires_at: None,
        otp_code: None,
        otp_expires_at: None,
        signer_session_id: None,
        signer_session_expires_at: None,
        sent_at: None,
        viewed_at: None,
        signed_at: None,
        declined_at: None,
        voided_at: None,
        voided_reason: None,
        signer_name: None,
        signer_email: None,
        created_at: now,
        updated_at: now,
    };

    db::contracts::insert_contract(pool, &contract).await?;
    db::events::append_event(
        pool,
        contract.id,
        "CREATED",
        json!({ "template_id": template.id, "client_id": input.client_id }),
        None,
        None,
    )
    .await?;
    db::events::append_audit(pool, "contract", contract.id, "CREATED", Some(&contract.contract_number))
        .await?;

    tracing::info!(contract_id = %contract.id, contract_number = %contract.contract_number,
        "Contract created");
    Ok(contract)
}

/// DRAFT → SENT: render the body snapshot and PDF, mint the magic link, and
/// email it to the client.
///
/// PDF rendering is a hard failure: a contract without its artifact is not
/// sent. Email is best-effort; the admin can resend.
pub async fn send_contract(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    id: Uuid,
) -> ApiResult<Contract> {
    let contract = load_contract(pool, id).await?;
    if contract.status != ContractStatus::Draft {
        return Err(ApiError::InvalidState(format!(
            "cannot send a {} contract",
            contract.status.as_str()
        )));
    }

    let client = db::clients::get_client(pool, contract.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", contract.client_id)))?;
    let template = db::templates::get_template(pool, contract.template_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", contract.template_id)))?;

    // Workflow-owned bindings take precedence over caller-supplied ones
    let mut variables = contract.variables.clone();
    variables.insert("client_name".into(), json!(client.name));
    variables.insert("client_email".into(), json!(client.email));
    variables.insert("contract_number".into(), json!(contract.contract_number));
    variables.insert("contract_title".into(), json!(contract.title));
    let body_html = renderer::render_body(&template.body_html, &variables);

    let pdf_bytes = pdf::render_contract_pdf(&contract.title, &contract.contract_number, &body_html)
        .map_err(|e| ApiError::IntegrationFailure(format!("PDF rendering failed: {}", e)))?;
    let pdf_hash = pdf::sha256_hex(&pdf_bytes);
    let relative_path = format!(
        "uploads/{}",
        pdf::rendered_filename(&contract.contract_number, &pdf_hash)
    );
    tokio::fs::create_dir_all(config.uploads_dir()).await?;
    tokio::fs::write(config.data_dir.join(&relative_path), &pdf_bytes).await?;

    let now = Utc::now();
    let token = tokens::mint_token();
    let link_expires_at = tokens::expiry_hours(now, config.magic_link_ttl_hours);

    let updated = db::contracts::mark_sent(
        pool,
        contract.id,
        &body_html,
        &token,
        link_expires_at,
        Some(&relative_path),
        Some(&pdf_hash),
        now,
    )
    .await?;
    if !updated {
        return Err(ApiError::InvalidState(
            "contract is no longer in DRAFT".into(),
        ));
    }

    db::events::append_event(pool, contract.id, "SENT", json!({ "to": client.email }), None, None)
        .await?;
    db::events::append_audit(pool, "contract", contract.id, "SENT", Some(&client.email)).await?;
    webhooks::enqueue_event(
        pool,
        &StudioEvent::ContractSent {
            contract_id: contract.id,
            contract_number: contract.contract_number.clone(),
            client_id: client.id,
            timestamp: now,
        },
    )
    .await?;

    let link_url = format!(
        "{}/sign/{}",
        config.public_base_url.trim_end_matches('/'),
        token
    );
    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            &client.email,
            &config.sender_email,
            mailer::magic_link_email(
                &client.name,
                &contract.title,
                &contract.contract_number,
                &link_url,
                link_expires_at,
            ),
        ),
    )
    .await;

    tracing::info!(contract_id = %contract.id, "Contract sent");
    load_contract(pool, id).await
}

/// Re-email the magic link for an outstanding contract. A lapsed link is
/// replaced with a fresh token first.
pub async fn resend_notification(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    id: Uuid,
) -> ApiResult<Contract> {
    let contract = load_contract(pool, id).await?;
    if !matches!(contract.status, ContractStatus::Sent | ContractStatus::Viewed) {
        return Err(ApiError::InvalidState(format!(
            "cannot resend a {} contract",
            contract.status.as_str()
        )));
    }

    let client = db::clients::get_client(pool, contract.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", contract.client_id)))?;

    let now = Utc::now();
    let (token, link_expires_at) =
        if tokens::is_expired(contract.magic_link_expires_at, now) || contract.magic_link_token.is_none() {
            let token = tokens::mint_token();
            let expires_at = tokens::expiry_hours(now, config.magic_link_ttl_hours);
            let updated =
                db::contracts::refresh_magic_link(pool, contract.id, &token, expires_at, now)
                    .await?;
            if !updated {
                return Err(ApiError::InvalidState(
                    "contract is no longer outstanding".into(),
                ));
            }
            (token, expires_at)
        } else {
            (
                contract.magic_link_token.clone().unwrap_or_default(),
                contract.magic_link_expires_at.unwrap_or(now),
            )
        };

    db::events::append_event(pool, contract.id, "RESENT", json!({ "to": client.email }), None, None)
        .await?;

    let link_url = format!(
        "{}/sign/{}",
        config.public_base_url.trim_end_matches('/'),
        token
    );
    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            &client.email,
            &config.sender_email,
            mailer::magic_link_email(
                &client.name,
                &contract.title,
                &contract.contract_number,
                &link_url,
                link_expires_at,
            ),
        ),
    )
    .await;

    load_contract(pool, id).await
}

/// Read-only magic-link resolution: validate the token and project what the
/// signer may see. Does not transition state.
pub async fn view_contract(
    pool: &SqlitePool,
    config: &ServiceConfig,
    token: &str,
) -> ApiResult<SignerView> {
    let contract = db::contracts::get_contract_by_token(pool, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("contract".into()))?;

    if let Some(err) = terminal_error(contract.status) {
        return Err(err);
    }
    let now = Utc::now();
    if tokens::is_expired(contract.magic_link_expires_at, now) {
        return Err(ApiError::TokenExpired);
    }

    let client = db::clients::get_client(pool, contract.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", contract.client_id)))?;

    Ok(SignerView {
        contract_id: contract.id,
        contract_number: contract.contract_number,
        title: contract.title,
        status: contract.status,
        body_html: contract.body_html,
        client_name: client.name,
        sign_by_at: contract.sign_by_at,
        requires_otp: config.require_otp && contract.status == ContractStatus::Sent,
    })
}

/// Mint and email a one-time code for session opening. Only meaningful while
/// the contract is SENT and OTP verification is required.
pub async fn request_otp(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    token: &str,
) -> ApiResult<()> {
    let contract = db::contracts::get_contract_by_token(pool, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("contract".into()))?;

    if let Some(err) = terminal_error(contract.status) {
        return Err(err);
    }
    let now = Utc::now();
    if tokens::is_expired(contract.magic_link_expires_at, now) {
        return Err(ApiError::TokenExpired);
    }
    if contract.status != ContractStatus::Sent {
        return Err(ApiError::InvalidState(
            "a signer session is already open".into(),
        ));
    }

    let client = db::clients::get_client(pool, contract.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", contract.client_id)))?;

    let code = tokens::mint_otp();
    let expires_at = tokens::expiry_minutes(now, config.otp_ttl_minutes);
    let updated = db::contracts::set_otp(pool, contract.id, &code, expires_at).await?;
    if !updated {
        return Err(ApiError::InvalidState(
            "contract is no longer awaiting signature".into(),
        ));
    }

    db::events::append_event(pool, contract.id, "OTP_REQUESTED", json!({}), None, None).await?;
    mailer::send_best_effort(
        sender,
        EmailMessage::new(
            &client.email,
            &config.sender_email,
            mailer::otp_email(&code, &contract.contract_number, config.otp_ttl_minutes),
        ),
    )
    .await;
    Ok(())
}

/// Redeem the magic link into a signer session.
///
/// First redemption moves SENT → VIEWED. A repeat redemption while the
/// previous session is still honored re-issues the session; once that session
/// has lapsed the link counts as consumed.
pub async fn open_signer_session(
    pool: &SqlitePool,
    config: &ServiceConfig,
    token: &str,
    otp: Option<&str>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResult<SessionGrant> {
    let contract = db::contracts::get_contract_by_token(pool, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("contract".into()))?;

    if let Some(err) = terminal_error(contract.status) {
        return Err(err);
    }
    let now = Utc::now();
    if tokens::is_expired(contract.magic_link_expires_at, now) {
        return Err(ApiError::TokenExpired);
    }

    let session_id = tokens::mint_token();
    let session_expires_at = tokens::expiry_minutes(now, config.signer_session_ttl_minutes);

    match contract.status {
        ContractStatus::Sent => {
            if config.require_otp {
                let supplied = otp.map(str::trim).unwrap_or_default();
                let valid = contract.otp_code.as_deref() == Some(supplied)
                    && !supplied.is_empty()
                    && !tokens::is_expired(contract.otp_expires_at, now);
                if !valid {
                    return Err(ApiError::Unauthorized(
                        "invalid or expired verification code".into(),
                    ));
                }
            }

            let opened =
                db::contracts::open_session(pool, contract.id, &session_id, session_expires_at, now)
                    .await?;
            if !opened {
                return Err(ApiError::InvalidState(
                    "contract is no longer awaiting signature".into(),
                ));
            }

            db::events::append_event(pool, contract.id, "VIEWED", json!({}), ip_address, user_agent)
                .await?;
            webhooks::enqueue_event(
                pool,
                &StudioEvent::ContractViewed {
                    contract_id: contract.id,
                    contract_number: contract.contract_number.clone(),
                    timestamp: now,
                },
            )
            .await?;
        }
        ContractStatus::Viewed => {
            // Repeat redemption is only honored while the previous session
            // is still live; afterwards the link is spent.
            if tokens::is_expired(contract.signer_session_expires_at, now) {
                return Err(ApiError::TokenConsumed);
            }
            let refreshed = db::contracts::refresh_session(
                pool,
                contract.id,
                &session_id,
                session_expires_at,
                now,
            )
            .await?;
            if !refreshed {
                return Err(ApiError::InvalidState(
                    "contract is no longer awaiting signature".into(),
                ));
            }
        }
        other => {
            return Err(ApiError::InvalidState(format!(
                "cannot open a session on a {} contract",
                other.as_str()
            )));
        }
    }

    Ok(SessionGrant {
        session_id,
        expires_at: session_expires_at,
        contract_id: contract.id,
    })
}

/// Admin void: any non-terminal contract, with a mandatory reason
pub async fn void_contract(
    pool: &SqlitePool,
    id: Uuid,
    reason: &str,
) -> ApiResult<Contract> {
    let contract = load_contract(pool, id).await?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ApiError::ValidationError("a void reason is required".into()));
    }

    let now = Utc::now();
    let voided = db::contracts::mark_voided(pool, contract.id, reason, now).await?;
    if !voided {
        return Err(ApiError::InvalidState(format!(
            "cannot void a {} contract",
            contract.status.as_str()
        )));
    }

    db::events::append_event(pool, contract.id, "VOIDED", json!({ "reason": reason }), None, None)
        .await?;
    db::events::append_audit(pool, "contract", contract.id, "VOIDED", Some(reason)).await?;
    webhooks::enqueue_event(
        pool,
        &StudioEvent::ContractVoided {
            contract_id: contract.id,
            contract_number: contract.contract_number.clone(),
            reason: reason.to_string(),
            timestamp: now,
        },
    )
    .await?;

    tracing::info!(contract_id = %contract.id, reason, "Contract voided");
    load_contract(pool, id).await
}

/// Background sweep: expire lapsed contracts and send deadline reminders.
/// Returns the number of contracts expired.
pub async fn expiry_sweep(
    pool: &SqlitePool,
    config: &ServiceConfig,
    sender: &dyn EmailSender,
    now: DateTime<Utc>,
) -> ApiResult<usize> {
    let mut expired = 0;
    for contract in db::contracts::list_expiry_candidates(pool, now).await? {
        if !db::contracts::mark_expired(pool, contract.id, now).await? {
            continue; // lost to a concurrent transition
        }
        expired += 1;
        db::events::append_event(pool, contract.id, "EXPIRED", json!({}), None, None).await?;
        webhooks::enqueue_event(
            pool,
            &StudioEvent::ContractExpired {
                contract_id: contract.id,
                contract_number: contract.contract_number.clone(),
                timestamp: now,
            },
        )
        .await?;
        tracing::info!(contract_id = %contract.id, "Contract expired");
    }

    let window_end = now + chrono::Duration::hours(config.reminder_window_hours);
    for contract in db::contracts::list_reminder_candidates(pool, now, window_end).await? {
        let Some(client) = db::clients::get_client(pool, contract.client_id).await? else {
            continue;
        };
        let Some(link_url) = contract.magic_link_url(&config.public_base_url) else {
            continue;
        };
        let Some(sign_by_at) = contract.sign_by_at else {
            continue;
        };

        mailer::send_best_effort(
            sender,
            EmailMessage::new(
                &client.email,
                &config.sender_email,
                mailer::expiring_reminder_email(
                    &client.name,
                    &contract.title,
                    &contract.contract_number,
                    sign_by_at,
                    &link_url,
                ),
            ),
        )
        .await;
        db::contracts::mark_reminder_sent(pool, contract.id, now).await?;
        db::events::append_event(pool, contract.id, "REMINDER_SENT", json!({}), None, None).await?;
    }

    Ok(expired)
}
