//! Entitlement Module
//!
//! Provides a unified view of what a user can do based on their billing state.
//! This module answers the question: "can this user generate content right now,
//! and against what limit?"
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: `compute_from_raw()` is THE function that determines access
//! 2. **Deterministic**: Same inputs always produce same outputs
//! 3. **Pure read**: evaluation never mutates counters or subscriptions
//! 4. **Testable**: Pure function with clear inputs/outputs

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use threadforge_shared::{PlanType, SubscriptionStatus};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::usage::current_month_key;

/// Tunable evaluation rules.
#[derive(Debug, Clone, Copy)]
pub struct EntitlementPolicy {
    /// Whether a past_due subscription still confers its paid plan.
    /// Defaults to true: one failed charge should not lock a paying user out
    /// mid-month; cancellation is the hard cutoff.
    pub past_due_keeps_plan: bool,
}

impl Default for EntitlementPolicy {
    fn default() -> Self {
        Self {
            past_due_keeps_plan: true,
        }
    }
}

/// Complete entitlement information for a user.
/// Serialized field names are part of the client contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    /// Whether another generation is allowed right now
    pub can_generate: bool,
    /// Credits consumed in the current month
    pub current_usage: i64,
    /// Monthly credit allowance for the effective plan
    pub limit: i64,
    /// Effective plan
    pub plan_type: PlanType,
}

/// Raw data needed to compute an entitlement.
///
/// Plan and status come back as stored strings so the pure computation can
/// handle unknown values defensively instead of failing the decode.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawEntitlementData {
    pub user_id: Uuid,
    pub plan_type: Option<String>,
    pub subscription_status: Option<String>,
    pub credits_consumed: i64,
}

/// Entitlement service for computing and querying entitlements
#[derive(Clone)]
pub struct EntitlementService {
    pool: PgPool,
    policy: EntitlementPolicy,
}

impl EntitlementService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: EntitlementPolicy::default(),
        }
    }

    pub fn with_policy(pool: PgPool, policy: EntitlementPolicy) -> Self {
        Self { pool, policy }
    }

    /// Compute the complete entitlement for a user.
    ///
    /// Storage errors propagate instead of defaulting the user into any plan;
    /// callers on the generation path must treat an error as "not allowed".
    pub async fn evaluate(&self, user_id: Uuid) -> BillingResult<Entitlement> {
        let raw = self.load_raw(user_id).await?;
        Ok(Self::compute_from_raw(&raw, self.policy))
    }

    /// Evaluate and fail with the credit-limit error when generation is not
    /// allowed. The returned entitlement reflects the state before any
    /// consumption.
    pub async fn ensure_can_generate(&self, user_id: Uuid) -> BillingResult<Entitlement> {
        let entitlement = self.evaluate(user_id).await?;
        if !entitlement.can_generate {
            return Err(BillingError::CreditLimitReached {
                used: entitlement.current_usage,
                limit: entitlement.limit,
            });
        }
        Ok(entitlement)
    }

    /// Effective plan for display surfaces only.
    ///
    /// This is the one deliberate fail-open path: a pricing page or header
    /// badge showing "free" on a storage hiccup is harmless, so errors are
    /// logged and swallowed here. Enforcement paths go through `evaluate`.
    pub async fn plan_for_display(&self, user_id: Uuid) -> PlanType {
        match self.evaluate(user_id).await {
            Ok(entitlement) => entitlement.plan_type,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Entitlement lookup failed, displaying free plan"
                );
                PlanType::Free
            }
        }
    }

    /// Load subscription state and current-month usage in one query.
    async fn load_raw(&self, user_id: Uuid) -> BillingResult<RawEntitlementData> {
        let month_key = current_month_key();
        let raw: RawEntitlementData = sqlx::query_as(
            r#"
            SELECT
                target.user_id,
                s.plan_type AS plan_type,
                s.status AS subscription_status,
                COALESCE(u.credits_consumed, 0) AS credits_consumed
            FROM (SELECT $1::uuid AS user_id) target
            LEFT JOIN LATERAL (
                SELECT plan_type, status
                FROM subscriptions
                WHERE user_id = target.user_id
                  AND status IN ('active', 'past_due')
                ORDER BY updated_at DESC
                LIMIT 1
            ) s ON true
            LEFT JOIN usage_records u
                ON u.user_id = target.user_id AND u.month_key = $2
            "#,
        )
        .bind(user_id)
        .bind(&month_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(raw)
    }

    /// Pure function: compute entitlement from raw data.
    ///
    /// Absent subscriptions, unknown statuses, and unparseable plan values
    /// all resolve to the free plan; nothing here can reject a user outright.
    pub fn compute_from_raw(raw: &RawEntitlementData, policy: EntitlementPolicy) -> Entitlement {
        let status = raw
            .subscription_status
            .as_deref()
            .and_then(|s| s.parse::<SubscriptionStatus>().ok());

        let plan_bearing = match status {
            Some(SubscriptionStatus::Active) => true,
            Some(SubscriptionStatus::PastDue) => policy.past_due_keeps_plan,
            _ => false,
        };

        let plan_type = if plan_bearing {
            raw.plan_type
                .as_deref()
                .and_then(|p| p.parse::<PlanType>().ok())
                .unwrap_or(PlanType::Free)
        } else {
            PlanType::Free
        };

        let limit = plan_type.monthly_credits();
        let current_usage = raw.credits_consumed;

        Entitlement {
            can_generate: current_usage < limit,
            current_usage,
            limit,
            plan_type,
        }
    }
}
