//! Usage metering API routes

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use threadforge_billing::current_month_key;
use threadforge_shared::GenerationKind;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::format_datetime,
    state::AppState,
};

/// Longest single piece of content we accept; a full thread is still far
/// below this
const MAX_CONTENT_CHARS: usize = 10_000;

/// Most credits one request may consume (a maximum-length thread)
const MAX_CREDITS_PER_REQUEST: i64 = 25;

/// Current billing month usage
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub user_id: Uuid,
    pub month_key: String,
    pub credits_used: i64,
    pub credits_limit: i64,
    pub plan_type: String,
}

/// Request body for POST /usage/consume
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub kind: GenerationKind,
    pub content: String,
    /// Credits this generation costs; a thread reports its tweet count.
    /// Defaults to 1.
    pub credits: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub generation_id: Uuid,
    pub kind: GenerationKind,
    pub credits_spent: i64,
    pub credits_used: i64,
    pub credits_limit: i64,
}

/// Query params for GET /usage/generations
#[derive(Debug, Deserialize)]
pub struct GenerationsQuery {
    pub kind: GenerationKind,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GenerationItem {
    pub id: Uuid,
    pub content: String,
    pub credits_spent: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct GenerationsResponse {
    pub kind: GenerationKind,
    pub generations: Vec<GenerationItem>,
}

/// Get the caller's current-month usage
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UsageResponse>> {
    let entitlement = state.entitlements.evaluate(auth_user.user_id).await?;

    Ok(Json(UsageResponse {
        user_id: auth_user.user_id,
        month_key: current_month_key(),
        credits_used: entitlement.current_usage,
        credits_limit: entitlement.limit,
        plan_type: entitlement.plan_type.to_string(),
    }))
}

/// Record a generation and charge its credits.
///
/// The entitlement gate runs first; a caller at their limit gets the 402
/// before anything is written. The increment itself is atomic, so
/// concurrent requests that both pass the gate still sum correctly (the
/// last batch of a thread may finish slightly over the limit, which is
/// accepted).
pub async fn consume(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<Json<ConsumeResponse>> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("content must not be empty".to_string()));
    }
    if req.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::Validation(format!(
            "content exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let credits = req.credits.unwrap_or(1);
    if !(1..=MAX_CREDITS_PER_REQUEST).contains(&credits) {
        return Err(ApiError::Validation(format!(
            "credits must be between 1 and {}",
            MAX_CREDITS_PER_REQUEST
        )));
    }

    let entitlement = state.entitlements.ensure_can_generate(auth_user.user_id).await?;

    let new_total = state.usage.increment_usage(auth_user.user_id, credits).await?;
    let generation_id = state
        .usage
        .record_generation(auth_user.user_id, req.kind, &req.content, credits)
        .await?;

    tracing::info!(
        user_id = %auth_user.user_id,
        kind = %req.kind,
        credits = credits,
        credits_used = new_total,
        credits_limit = entitlement.limit,
        "Generation recorded"
    );

    Ok(Json(ConsumeResponse {
        generation_id,
        kind: req.kind,
        credits_spent: credits,
        credits_used: new_total,
        credits_limit: entitlement.limit,
    }))
}

/// List the caller's recent generations of one kind
pub async fn list_generations(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<GenerationsQuery>,
) -> ApiResult<Json<GenerationsResponse>> {
    let records = state
        .usage
        .list_generations(auth_user.user_id, query.kind, query.limit.unwrap_or(20))
        .await?;

    Ok(Json(GenerationsResponse {
        kind: query.kind,
        generations: records
            .into_iter()
            .map(|r| GenerationItem {
                id: r.id,
                content: r.content,
                credits_spent: r.credits_spent,
                created_at: format_datetime(r.created_at),
            })
            .collect(),
    }))
}
