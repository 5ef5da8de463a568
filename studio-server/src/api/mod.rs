//! HTTP surface: router assembly and handler modules

pub mod admin;
pub mod auth;
pub mod health;
pub mod signer;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Build the full application router.
///
/// Admin routes are nested under `/admin` behind the API-key middleware;
/// signer routes are gated by their own tokens and sessions instead.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/clients", post(admin::create_client).get(admin::list_clients))
        .route(
            "/templates",
            post(admin::create_template).get(admin::list_templates),
        )
        .route("/templates/:id", get(admin::get_template))
        .route("/templates/:id/deactivate", post(admin::deactivate_template))
        .route(
            "/contracts",
            post(admin::create_contract).get(admin::list_contracts),
        )
        .route("/contracts/:id", get(admin::get_contract))
        .route("/contracts/:id/send", post(admin::send_contract))
        .route("/contracts/:id/resend", post(admin::resend_contract))
        .route("/contracts/:id/void", post(admin::void_contract))
        .route("/contracts/:id/events", get(admin::contract_events))
        .route("/envelopes", post(admin::create_envelope))
        .route("/envelopes/:id", get(admin::get_envelope))
        .route("/envelopes/:id/send", post(admin::send_envelope))
        .route(
            "/webhooks",
            post(admin::create_webhook).get(admin::list_webhooks),
        )
        .route("/webhooks/:id/deliveries", get(admin::webhook_deliveries))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_key,
        ));

    Router::new()
        .route("/health", get(health::health))
        .nest("/admin", admin_routes)
        .route("/sign/:token", get(signer::view_contract))
        .route("/sign/:token/otp", post(signer::request_otp))
        .route("/sign/:token/session", post(signer::open_session))
        .route("/contracts/:id/sign", post(signer::sign_contract))
        .route("/contracts/:id/decline", post(signer::decline_contract))
        .route("/envelope-sign/:token", get(signer::view_envelope_signer))
        .route("/envelope-sign/:token/sign", post(signer::sign_envelope))
        .route(
            "/envelope-sign/:token/decline",
            post(signer::decline_envelope),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
