//! Entitlement evaluation API routes

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;
use threadforge_billing::Entitlement;
use threadforge_shared::PlanType;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// Deliberately camelCase: this payload is consumed verbatim by the
/// frontend's entitlement hook
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan_type: PlanType,
}

/// Evaluate the caller's entitlement.
///
/// The [`Entitlement`] payload serializes camelCase
/// (canGenerate/currentUsage/limit/planType); gating decisions on the
/// client read it directly.
pub async fn get_entitlements(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Entitlement>> {
    let entitlement = state.entitlements.evaluate(auth_user.user_id).await?;

    tracing::debug!(
        user_id = %auth_user.user_id,
        can_generate = entitlement.can_generate,
        current_usage = entitlement.current_usage,
        limit = entitlement.limit,
        "Entitlement evaluated"
    );

    Ok(Json(entitlement))
}

/// Plan badge for display surfaces.
///
/// This endpoint never fails: a storage error degrades to showing the free
/// plan rather than breaking the page. Anything that gates behavior goes
/// through [`get_entitlements`] instead.
pub async fn get_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Json<PlanResponse> {
    let plan_type = state.entitlements.plan_for_display(auth_user.user_id).await;

    Json(PlanResponse { plan_type })
}
