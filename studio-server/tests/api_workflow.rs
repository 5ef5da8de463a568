//! End-to-end workflow tests driving the HTTP surface with in-memory SQLite

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use studio_common::config::TomlConfig;
use studio_server::config::ServiceConfig;
use studio_server::services::mailer::LogEmailSender;
use studio_server::{build_router, AppState};

const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

fn signature_data_url() -> String {
    format!("data:image/png;base64,{}", TINY_PNG_B64)
}

/// App with auth disabled and a tempdir-backed data folder
async fn test_app(dir: &std::path::Path, toml: TomlConfig) -> (Router, AppState) {
    let pool = studio_server::db::init_memory_pool().await.unwrap();
    studio_server::db::settings::set_setting(&pool, "admin_api_key", "0")
        .await
        .unwrap();
    let config = ServiceConfig::from_toml(&toml, dir.to_path_buf());
    let state = AppState::new(pool, config, Arc::new(LogEmailSender));
    (build_router(state.clone()), state)
}

async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    request(app, Method::GET, uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    request(app, Method::POST, uri, Some(body)).await
}

/// Create a client and template, returning their ids
async fn seed(app: &Router) -> (String, String) {
    let (status, client) = post(
        app,
        "/admin/clients",
        json!({ "name": "Jane Doe", "email": "jane@example.com" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, template) = post(
        app,
        "/admin/templates",
        json!({
            "name": "Wedding",
            "bodyHtml": "<p>Dear {{client_name}}, package: {{package}}.\
                         {{#if second_shooter}} Second shooter included.{{/if}}</p>",
            "variablesSchema": [{
                "title": "Details",
                "fields": [
                    { "name": "package", "type": "text", "required": true },
                    { "name": "second_shooter", "type": "text", "required": false }
                ]
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    (
        client["id"].as_str().unwrap().to_string(),
        template["id"].as_str().unwrap().to_string(),
    )
}

/// Create and send a contract; returns (contract id, magic link token)
async fn sent_contract(app: &Router, client_id: &str, template_id: &str) -> (String, String) {
    let (status, contract) = post(
        app,
        "/admin/contracts",
        json!({
            "templateId": template_id,
            "clientId": client_id,
            "title": "Wedding shoot",
            "variables": { "package": "Gold" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(contract["status"], "DRAFT");
    let id = contract["id"].as_str().unwrap().to_string();

    let (status, sent) = post(app, &format!("/admin/contracts/{}/send", id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["contract"]["status"], "SENT");
    let url = sent["magicLinkUrl"].as_str().unwrap();
    let token = url.rsplit('/').next().unwrap().to_string();
    (id, token)
}

/// Open a signer session, returning the session id
async fn open_session(app: &Router, token: &str) -> String {
    let (status, grant) = post(app, &format!("/sign/{}/session", token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    grant["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path(), TomlConfig::default()).await;
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_routes_require_api_key_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = test_app(dir.path(), TomlConfig::default()).await;
    studio_server::db::settings::set_setting(&state.db, "admin_api_key", "topsecret")
        .await
        .unwrap();

    // No key
    let (status, body) = get(&app, "/admin/clients").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // Wrong key
    let req = Request::builder()
        .method(Method::GET)
        .uri("/admin/clients")
        .header("X-Api-Key", "wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Valid key
    let req = Request::builder()
        .method(Method::GET)
        .uri("/admin/clients")
        .header("X-Api-Key", "topsecret")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Signer-facing routes stay open (404 for unknown token, not 401)
    let (status, _) = get(&app, "/sign/nosuchtoken").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_signing_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = test_app(dir.path(), TomlConfig::default()).await;
    let (client_id, template_id) = seed(&app).await;
    let (contract_id, token) = sent_contract(&app, &client_id, &template_id).await;

    // Signer opens the link
    let (status, view) = get(&app, &format!("/sign/{}", token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "SENT");
    assert!(view["body_html"]
        .as_str()
        .unwrap()
        .contains("Dear Jane Doe, package: Gold."));

    let session_id = open_session(&app, &token).await;

    // Sign
    let (status, outcome) = post(
        &app,
        &format!("/contracts/{}/sign", contract_id),
        json!({
            "sessionId": session_id,
            "signatureDataUrl": signature_data_url(),
            "signerName": "Jane Doe",
            "signerEmail": "jane@example.com",
            "agreedToTerms": true
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "SIGNED");
    let pdf_hash = outcome["pdfHash"].as_str().unwrap();
    assert_eq!(pdf_hash.len(), 64);

    // The stored artifact hashes to the recorded value
    let (_, stored) = get(&app, &format!("/admin/contracts/{}", contract_id)).await;
    let pdf_path = stored["pdf_path"].as_str().unwrap();
    let bytes = std::fs::read(state.config.data_dir.join(pdf_path)).unwrap();
    assert_eq!(
        studio_server::services::pdf::sha256_hex(&bytes),
        pdf_hash
    );

    // Event trail in order
    let (_, trail) = get(&app, &format!("/admin/contracts/{}/events", contract_id)).await;
    let types: Vec<&str> = trail["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["CREATED", "SENT", "VIEWED", "SIGNED"]);
}

#[tokio::test]
async fn double_sign_conflicts_and_wrong_email_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path(), TomlConfig::default()).await;
    let (client_id, template_id) = seed(&app).await;
    let (contract_id, token) = sent_contract(&app, &client_id, &template_id).await;
    let session_id = open_session(&app, &token).await;

    // Wrong signer email
    let (status, body) = post(
        &app,
        &format!("/contracts/{}/sign", contract_id),
        json!({
            "sessionId": session_id,
            "signatureDataUrl": signature_data_url(),
            "signerName": "Someone Else",
            "signerEmail": "intruder@example.com",
            "agreedToTerms": true
        }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "EMAIL_MISMATCH");

    let sign_body = json!({
        "sessionId": session_id,
        "signatureDataUrl": signature_data_url(),
        "signerName": "Jane Doe",
        "signerEmail": "jane@example.com",
        "agreedToTerms": true
    });
    let (status, _) = post(
        &app,
        &format!("/contracts/{}/sign", contract_id),
        sign_body.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&app, &format!("/contracts/{}/sign", contract_id), sign_body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_SIGNED");
}

#[tokio::test]
async fn decline_with_reason() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path(), TomlConfig::default()).await;
    let (client_id, template_id) = seed(&app).await;
    let (contract_id, token) = sent_contract(&app, &client_id, &template_id).await;
    let session_id = open_session(&app, &token).await;

    let (status, outcome) = post(
        &app,
        &format!("/contracts/{}/decline", contract_id),
        json!({ "sessionId": session_id, "reason": "chose another studio" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "DECLINED");

    // The magic link is dead afterwards
    let (status, _) = get(&app, &format!("/sign/{}", token)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn expired_link_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let toml = TomlConfig {
        magic_link_ttl_hours: Some(-1),
        ..Default::default()
    };
    let (app, _) = test_app(dir.path(), toml).await;
    let (client_id, template_id) = seed(&app).await;
    let (_, token) = sent_contract(&app, &client_id, &template_id).await;

    let (status, body) = get(&app, &format!("/sign/{}", token)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");

    let (status, _) = post(&app, &format!("/sign/{}/session", token), json!({})).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn void_from_admin() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path(), TomlConfig::default()).await;
    let (client_id, template_id) = seed(&app).await;
    let (contract_id, token) = sent_contract(&app, &client_id, &template_id).await;

    let (status, voided) = post(
        &app,
        &format!("/admin/contracts/{}/void", contract_id),
        json!({ "reason": "duplicate booking" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(voided["status"], "VOIDED");

    // Signer routes refuse the voided contract
    let (status, _) = get(&app, &format!("/sign/{}", token)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Void is not repeatable
    let (status, _) = post(
        &app,
        &format!("/admin/contracts/{}/void", contract_id),
        json!({ "reason": "again" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn sequential_envelope_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path(), TomlConfig::default()).await;

    let (status, created) = post(
        &app,
        "/admin/envelopes",
        json!({
            "title": "Venue and couple",
            "mode": "SEQUENTIAL",
            "signers": [
                { "name": "Jane Doe", "email": "jane@example.com", "sequenceNumber": 1 },
                { "name": "Venue Manager", "email": "venue@example.com", "sequenceNumber": 2 }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let envelope_id = created["envelope"]["id"].as_str().unwrap().to_string();

    let (status, sent) = post(
        &app,
        &format!("/admin/envelopes/{}/send", envelope_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Signers come back ordered by sequence number, each with a fresh token
    let signers = sent["signers"].as_array().unwrap();
    assert_eq!(signers.len(), 2);
    let first_token = signers[0]["token"].as_str().unwrap().to_string();
    let second_token = signers[1]["token"].as_str().unwrap().to_string();

    let submission = json!({
        "signatureDataUrl": signature_data_url(),
        "agreedToTerms": true
    });

    // Second signer cannot go first
    let (status, body) = post(
        &app,
        &format!("/envelope-sign/{}/sign", second_token),
        submission.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SIGNING_ORDER_VIOLATION");

    let (status, body) = post(
        &app,
        &format!("/envelope-sign/{}/sign", first_token),
        submission.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING");

    let (status, body) = post(
        &app,
        &format!("/envelope-sign/{}/sign", second_token),
        submission,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
}

#[tokio::test]
async fn webhook_deliveries_are_queued_for_lifecycle_events() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path(), TomlConfig::default()).await;

    let (status, endpoint) = post(
        &app,
        "/admin/webhooks",
        json!({
            "url": "https://hooks.example.com/studio",
            "secret": "whsec_test",
            "eventTypes": ["contract.sent", "contract.signed"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    // The secret is never serialized back
    assert!(endpoint.get("secret").is_none());
    let endpoint_id = endpoint["id"].as_str().unwrap().to_string();

    let (client_id, template_id) = seed(&app).await;
    let (contract_id, token) = sent_contract(&app, &client_id, &template_id).await;
    let session_id = open_session(&app, &token).await;
    post(
        &app,
        &format!("/contracts/{}/sign", contract_id),
        json!({
            "sessionId": session_id,
            "signatureDataUrl": signature_data_url(),
            "signerName": "Jane Doe",
            "signerEmail": "jane@example.com",
            "agreedToTerms": true
        }),
    )
    .await;

    let (status, deliveries) = get(
        &app,
        &format!("/admin/webhooks/{}/deliveries", endpoint_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let types: Vec<&str> = deliveries
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["event_type"].as_str().unwrap())
        .collect();
    // contract.viewed is filtered out by the subscription; newest first
    assert_eq!(types.len(), 2);
    assert!(types.contains(&"contract.sent"));
    assert!(types.contains(&"contract.signed"));
    for delivery in deliveries.as_array().unwrap() {
        assert_eq!(delivery["status"], "PENDING");
        assert_eq!(delivery["attempts"], 0);
    }
}
