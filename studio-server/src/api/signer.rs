//! Signer-facing handlers
//!
//! These routes are reached through magic-link tokens and signer sessions,
//! never the admin API key. Responses are projections that omit tokens,
//! codes and other server-side secrets.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{Contract, Envelope, SignatureSubmission, Signer};
use crate::services::{envelopes, lifecycle, signing};
use crate::AppState;

/// Client IP as reported by the reverse proxy
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Signer-safe projection of a contract after an action
fn contract_outcome(contract: &Contract) -> serde_json::Value {
    json!({
        "contractId": contract.id,
        "contractNumber": contract.contract_number,
        "status": contract.status,
        "signedAt": contract.signed_at,
        "declinedAt": contract.declined_at,
        "pdfHash": contract.pdf_hash,
    })
}

fn signer_summary(signer: &Signer) -> serde_json::Value {
    json!({
        "name": signer.name,
        "email": signer.email,
        "role": signer.role,
        "sequenceNumber": signer.sequence_number,
        "status": signer.status,
    })
}

fn envelope_summary(envelope: &Envelope, signers: &[Signer]) -> serde_json::Value {
    json!({
        "envelopeId": envelope.id,
        "title": envelope.title,
        "mode": envelope.mode,
        "status": envelope.status,
        "signers": signers.iter().map(signer_summary).collect::<Vec<_>>(),
    })
}

// ── Single-contract routes ─────────────────────────────────────────────

pub async fn view_contract(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<lifecycle::SignerView>> {
    Ok(Json(
        lifecycle::view_contract(&state.db, &state.config, &token).await?,
    ))
}

pub async fn request_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    lifecycle::request_otp(&state.db, &state.config, state.mailer.as_ref(), &token).await?;
    Ok(Json(json!({ "status": "sent" })))
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub otp: Option<String>,
}

pub async fn open_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OpenSessionRequest>,
) -> ApiResult<Json<lifecycle::SessionGrant>> {
    let grant = lifecycle::open_signer_session(
        &state.db,
        &state.config,
        &token,
        body.otp.as_deref(),
        client_ip(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;
    Ok(Json(grant))
}

pub async fn sign_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(submission): Json<SignatureSubmission>,
) -> ApiResult<Json<serde_json::Value>> {
    let contract = signing::sign_contract(
        &state.db,
        &state.config,
        state.mailer.as_ref(),
        id,
        &submission,
        client_ip(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;
    Ok(Json(contract_outcome(&contract)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineRequest {
    pub session_id: String,
    pub reason: Option<String>,
}

pub async fn decline_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<DeclineRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let contract = signing::decline_contract(
        &state.db,
        &state.config,
        state.mailer.as_ref(),
        id,
        &body.session_id,
        body.reason.as_deref(),
        client_ip(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;
    Ok(Json(contract_outcome(&contract)))
}

// ── Envelope routes ────────────────────────────────────────────────────

pub async fn view_envelope_signer(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let (envelope, signer, signers) = envelopes::view_signer(&state.db, &token).await?;
    let mut body = envelope_summary(&envelope, &signers);
    body["you"] = signer_summary(&signer);
    Ok(Json(body))
}

pub async fn sign_envelope(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(submission): Json<envelopes::EnvelopeSubmission>,
) -> ApiResult<Json<serde_json::Value>> {
    let (envelope, signers) = envelopes::sign_envelope(&state.db, &token, &submission).await?;
    Ok(Json(envelope_summary(&envelope, &signers)))
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeDeclineRequest {
    pub reason: Option<String>,
}

pub async fn decline_envelope(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<EnvelopeDeclineRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (envelope, signers) = envelopes::decline_envelope(
        &state.db,
        &state.config,
        state.mailer.as_ref(),
        &token,
        body.reason.as_deref(),
    )
    .await?;
    Ok(Json(envelope_summary(&envelope, &signers)))
}
