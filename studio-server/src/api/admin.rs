//! Admin (back-office) handlers
//!
//! All routes here sit behind the API-key middleware. Request bodies use
//! camelCase field names; responses serialize the domain models directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Client, ContractTemplate, TemplateSection, WebhookEndpoint};
use crate::services::{envelopes, lifecycle};
use crate::AppState;

// ── Clients ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

pub async fn create_client(
    State(state): State<AppState>,
    Json(body): Json<CreateClientRequest>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::ValidationError("name must not be empty".into()));
    }
    let email = body.email.trim().to_string();
    if !crate::services::signing::is_valid_email(&email) {
        return Err(ApiError::ValidationError(format!(
            "invalid email '{}'",
            body.email
        )));
    }

    let client = Client {
        id: Uuid::new_v4(),
        name,
        email,
        phone: body.phone,
        notes: body.notes,
        created_at: Utc::now(),
    };
    db::clients::insert_client(&state.db, &client).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn list_clients(State(state): State<AppState>) -> ApiResult<Json<Vec<Client>>> {
    Ok(Json(db::clients::list_clients(&state.db).await?))
}

// ── Templates ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub body_html: String,
    #[serde(default)]
    pub variables_schema: Vec<TemplateSection>,
    #[serde(default)]
    pub is_published: bool,
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(body): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<ContractTemplate>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::ValidationError("name must not be empty".into()));
    }
    if body.body_html.trim().is_empty() {
        return Err(ApiError::ValidationError("body must not be empty".into()));
    }
    if db::templates::active_template_name_exists(&state.db, &name).await? {
        return Err(ApiError::ValidationError(format!(
            "an active template named '{}' already exists",
            name
        )));
    }

    let now = Utc::now();
    let template = ContractTemplate {
        id: Uuid::new_v4(),
        name,
        description: body.description,
        event_type: body.event_type,
        body_html: body.body_html,
        variables_schema: body.variables_schema,
        is_active: true,
        is_published: body.is_published,
        version: 1,
        created_at: now,
        updated_at: now,
    };
    db::templates::insert_template(&state.db, &template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn list_templates(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ContractTemplate>>> {
    Ok(Json(db::templates::list_templates(&state.db).await?))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ContractTemplate>> {
    let template = db::templates::get_template(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", id)))?;
    Ok(Json(template))
}

pub async fn deactivate_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    db::templates::get_template(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("template {}", id)))?;
    if !db::templates::deactivate_template(&state.db, id).await? {
        return Err(ApiError::InvalidState("template is already inactive".into()));
    }
    Ok(Json(json!({ "id": id, "isActive": false })))
}

// ── Contracts ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContractRequest {
    pub template_id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub proposal_id: Option<Uuid>,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub sign_by_at: Option<DateTime<Utc>>,
}

pub async fn create_contract(
    State(state): State<AppState>,
    Json(body): Json<CreateContractRequest>,
) -> ApiResult<(StatusCode, Json<crate::models::Contract>)> {
    let contract = lifecycle::create_contract(
        &state.db,
        lifecycle::NewContract {
            template_id: body.template_id,
            client_id: body.client_id,
            title: body.title,
            proposal_id: body.proposal_id,
            variables: body.variables,
            sign_by_at: body.sign_by_at,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn list_contracts(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<crate::models::Contract>>> {
    Ok(Json(db::contracts::list_contracts(&state.db).await?))
}

pub async fn get_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<crate::models::Contract>> {
    let contract = db::contracts::get_contract(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", id)))?;
    Ok(Json(contract))
}

pub async fn send_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let contract =
        lifecycle::send_contract(&state.db, &state.config, state.mailer.as_ref(), id).await?;
    let magic_link_url = contract.magic_link_url(&state.config.public_base_url);
    Ok(Json(json!({
        "contract": contract,
        "magicLinkUrl": magic_link_url,
    })))
}

pub async fn resend_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let contract =
        lifecycle::resend_notification(&state.db, &state.config, state.mailer.as_ref(), id).await?;
    let magic_link_url = contract.magic_link_url(&state.config.public_base_url);
    Ok(Json(json!({
        "contract": contract,
        "magicLinkUrl": magic_link_url,
    })))
}

#[derive(Debug, Deserialize)]
pub struct VoidRequest {
    pub reason: String,
}

pub async fn void_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<VoidRequest>,
) -> ApiResult<Json<crate::models::Contract>> {
    Ok(Json(lifecycle::void_contract(&state.db, id, &body.reason).await?))
}

pub async fn contract_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    db::contracts::get_contract(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", id)))?;
    let events = db::events::list_events(&state.db, id).await?;
    let audit = db::events::list_audit(&state.db, id).await?;
    Ok(Json(json!({ "events": events, "audit": audit })))
}

// ── Envelopes ──────────────────────────────────────────────────────────

pub async fn create_envelope(
    State(state): State<AppState>,
    Json(body): Json<envelopes::NewEnvelope>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let (envelope, signers) = envelopes::create_envelope(&state.db, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "envelope": envelope, "signers": signers })),
    ))
}

pub async fn get_envelope(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let (envelope, signers) = envelopes::get_envelope_with_signers(&state.db, id).await?;
    Ok(Json(json!({ "envelope": envelope, "signers": signers })))
}

pub async fn send_envelope(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let (envelope, signers) =
        envelopes::send_envelope(&state.db, &state.config, state.mailer.as_ref(), id).await?;
    Ok(Json(json!({ "envelope": envelope, "signers": signers })))
}

// ── Webhooks ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhookRequest {
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(body): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<WebhookEndpoint>)> {
    if !body.url.starts_with("http://") && !body.url.starts_with("https://") {
        return Err(ApiError::ValidationError(
            "url must be http(s)".into(),
        ));
    }
    if body.secret.trim().is_empty() {
        return Err(ApiError::ValidationError("secret must not be empty".into()));
    }
    if body.event_types.is_empty() {
        return Err(ApiError::ValidationError(
            "at least one event type (or '*') is required".into(),
        ));
    }

    let endpoint = WebhookEndpoint {
        id: Uuid::new_v4(),
        url: body.url,
        secret: body.secret,
        event_types: body.event_types,
        timeout_ms: body
            .timeout_ms
            .unwrap_or(state.config.webhook_default_timeout_ms),
        max_attempts: body
            .max_attempts
            .unwrap_or(state.config.webhook_default_max_attempts),
        is_active: body.is_active,
        created_at: Utc::now(),
    };
    db::webhooks::insert_endpoint(&state.db, &endpoint).await?;
    Ok((StatusCode::CREATED, Json(endpoint)))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<WebhookEndpoint>>> {
    Ok(Json(db::webhooks::list_endpoints(&state.db).await?))
}

pub async fn webhook_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<crate::models::WebhookDelivery>>> {
    db::webhooks::get_endpoint(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("webhook endpoint {}", id)))?;
    Ok(Json(
        db::webhooks::list_deliveries_for_endpoint(&state.db, id).await?,
    ))
}
