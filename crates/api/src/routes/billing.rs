//! Billing API routes
//!
//! The webhook endpoint is the only public surface here; it authenticates
//! with the provider's HMAC signature instead of a JWT. Everything else
//! requires a bearer token.

use axum::{
    extract::{Extension, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use threadforge_shared::PlanType;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::format_datetime,
    state::AppState,
};

/// Signature header set by the payment provider on every delivery
const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Request body for POST /billing/subscriptions
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    /// Defaults to pro; free users have no subscription to register
    pub plan_type: Option<PlanType>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub plan_type: String,
    pub status: String,
    pub external_subscription_id: String,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub created_at: String,
}

/// Query params for GET /billing/payments
#[derive(Debug, Deserialize)]
pub struct PaymentsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaymentItem {
    pub id: Uuid,
    pub external_payment_id: String,
    pub amount_cents: Option<i64>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentsResponse {
    pub payments: Vec<PaymentItem>,
}

/// Handle payment provider webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    tracing::info!(body_len = body.len(), "Billing webhook received");

    // No signature, no parse: the body stays untrusted text until verified
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Billing webhook missing signature header");
            ApiError::WebhookSignature
        })?;

    let event = state.webhooks.verify_and_parse(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Billing webhook rejected");
        ApiError::from(e)
    })?;

    tracing::info!(
        event_type = %event.event_type(),
        "Billing webhook event verified"
    );

    // Storage failures become a 500 so the provider retries; everything the
    // handler drops on purpose already resolved Ok inside it
    state.webhooks.handle_event(event).await?;

    Ok(StatusCode::OK)
}

/// Register a pending subscription ahead of provider confirmation
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let plan = req.plan_type.unwrap_or(PlanType::Pro);

    let record = state
        .subscriptions
        .create_pending(
            auth_user.user_id,
            plan,
            &req.external_subscription_id,
            req.external_customer_id.as_deref(),
        )
        .await?;

    tracing::info!(
        user_id = %auth_user.user_id,
        external_subscription_id = %record.external_subscription_id,
        plan = %record.plan_type,
        "Subscription registered"
    );

    Ok(Json(subscription_response(record)))
}

/// Get the caller's current subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let record = state
        .subscriptions
        .current_for_user(auth_user.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(subscription_response(record)))
}

/// List the caller's payment history, newest first
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<PaymentsQuery>,
) -> ApiResult<Json<PaymentsResponse>> {
    let records = state
        .payments
        .list_for_user(auth_user.user_id, query.limit.unwrap_or(20))
        .await?;

    Ok(Json(PaymentsResponse {
        payments: records
            .into_iter()
            .map(|r| PaymentItem {
                id: r.id,
                external_payment_id: r.external_payment_id,
                amount_cents: r.amount_cents,
                status: r.status.to_string(),
                created_at: format_datetime(r.created_at),
            })
            .collect(),
    }))
}

fn subscription_response(record: threadforge_shared::SubscriptionRecord) -> SubscriptionResponse {
    SubscriptionResponse {
        id: record.id,
        plan_type: record.plan_type.to_string(),
        status: record.status.to_string(),
        external_subscription_id: record.external_subscription_id,
        current_period_start: record.current_period_start.map(format_datetime),
        current_period_end: record.current_period_end.map(format_datetime),
        created_at: format_datetime(record.created_at),
    }
}
