//! Platform admin API routes
//!
//! Every handler gates on the caller's role before touching the target
//! user. The underlying service writes the audit entry; handlers only
//! shape requests and responses.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use threadforge_billing::current_month_key;
use threadforge_shared::PlanType;
use uuid::Uuid;

use crate::{
    auth::{ensure_admin, AuthUser},
    error::ApiResult,
    routes::format_datetime,
    state::AppState,
};

/// Request body for POST /admin/users/:user_id/credits
#[derive(Debug, Deserialize)]
pub struct AdjustCreditsRequest {
    /// Signed credit delta; negative values refund credits back to the user
    pub delta: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdjustCreditsResponse {
    pub user_id: Uuid,
    pub credits_used: i64,
}

/// Request body for POST /admin/users/:user_id/plan
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_type: PlanType,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangePlanResponse {
    pub user_id: Uuid,
    pub plan_type: String,
    pub credits_limit: i64,
}

/// Request body for POST /admin/users/:user_id/usage/reset
#[derive(Debug, Default, Deserialize)]
pub struct ResetUsageRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetUsageResponse {
    pub user_id: Uuid,
    pub month_key: String,
    pub credits_used: i64,
}

/// Query params for audit listings
#[derive(Debug, Deserialize)]
pub struct ActionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ActionItem {
    pub id: i64,
    pub admin_user_id: Uuid,
    pub action_kind: String,
    pub target_user_id: Uuid,
    pub details: Value,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ActionsResponse {
    pub actions: Vec<ActionItem>,
}

/// Adjust a user's consumed credits by a signed delta
pub async fn adjust_credits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AdjustCreditsRequest>,
) -> ApiResult<Json<AdjustCreditsResponse>> {
    ensure_admin(&auth_user)?;

    let credits_used = state
        .admin
        .adjust_credits(auth_user.user_id, user_id, req.delta, req.reason.as_deref())
        .await?;

    tracing::info!(
        admin_user_id = %auth_user.user_id,
        target_user_id = %user_id,
        delta = req.delta,
        credits_used = credits_used,
        "Admin adjusted credits"
    );

    Ok(Json(AdjustCreditsResponse {
        user_id,
        credits_used,
    }))
}

/// Move a user onto a different plan, effective immediately
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<ChangePlanResponse>> {
    ensure_admin(&auth_user)?;

    state
        .admin
        .change_plan(auth_user.user_id, user_id, req.plan_type, req.reason.as_deref())
        .await?;

    Ok(Json(ChangePlanResponse {
        user_id,
        plan_type: req.plan_type.to_string(),
        credits_limit: req.plan_type.monthly_credits(),
    }))
}

/// Clear a user's current-month usage and purge their generation history
pub async fn reset_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ResetUsageRequest>,
) -> ApiResult<Json<ResetUsageResponse>> {
    ensure_admin(&auth_user)?;

    state
        .admin
        .reset_usage(auth_user.user_id, user_id, req.reason.as_deref())
        .await?;

    tracing::info!(
        admin_user_id = %auth_user.user_id,
        target_user_id = %user_id,
        "Admin reset usage"
    );

    Ok(Json(ResetUsageResponse {
        user_id,
        month_key: current_month_key(),
        credits_used: 0,
    }))
}

/// List recent admin actions across all users
pub async fn list_actions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ActionsQuery>,
) -> ApiResult<Json<ActionsResponse>> {
    ensure_admin(&auth_user)?;

    let records = state.admin.recent_actions(query.limit.unwrap_or(50)).await?;

    Ok(Json(actions_response(records)))
}

/// List admin actions that touched one user
pub async fn list_user_actions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ActionsQuery>,
) -> ApiResult<Json<ActionsResponse>> {
    ensure_admin(&auth_user)?;

    let records = state
        .admin
        .actions_for_user(user_id, query.limit.unwrap_or(50))
        .await?;

    Ok(Json(actions_response(records)))
}

fn actions_response(records: Vec<threadforge_billing::AdminActionRecord>) -> ActionsResponse {
    ActionsResponse {
        actions: records
            .into_iter()
            .map(|r| ActionItem {
                id: r.id,
                admin_user_id: r.admin_user_id,
                action_kind: r.action_kind,
                target_user_id: r.target_user_id,
                details: r.details,
                created_at: format_datetime(r.created_at),
            })
            .collect(),
    }
}
