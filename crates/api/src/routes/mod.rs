//! API routes

pub mod admin;
pub mod billing;
pub mod entitlements;
pub mod health;
pub mod usage;


use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use time::OffsetDateTime;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, security::security_headers_middleware, state::AppState};

/// RFC 3339 rendering for response payloads
pub(crate) fn format_datetime(dt: OffsetDateTime) -> String {
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Provider webhook (public; authenticated by signature, not JWT) - under /api/v1
    let public_api_routes = Router::new().route("/billing/webhook", post(billing::webhook));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Usage metering
        .route("/usage", get(usage::get_usage))
        .route("/usage/consume", post(usage::consume))
        .route("/usage/generations", get(usage::list_generations))
        // Entitlements
        .route("/entitlements", get(entitlements::get_entitlements))
        .route("/plan", get(entitlements::get_plan))
        // Billing
        .route("/billing/subscriptions", post(billing::create_subscription))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/payments", get(billing::list_payments))
        // Platform admin routes (role check inside handlers)
        .route("/admin/users/:user_id/credits", post(admin::adjust_credits))
        .route("/admin/users/:user_id/plan", post(admin::change_plan))
        .route("/admin/users/:user_id/usage/reset", post(admin::reset_usage))
        .route("/admin/users/:user_id/actions", get(admin::list_user_actions))
        .route("/admin/actions", get(admin::list_actions))
        // Apply auth middleware to protected routes
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        // Request bodies here are single tweets or threads; anything near this
        // limit is abuse
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}
