//! Admin Override Gateway
//!
//! Manual interventions on a user's billing state: credit adjustments, plan
//! changes, and usage resets. Every operation runs its primary action first
//! and then appends an audit entry best-effort. A failed audit append logs a
//! warning and never fails the action it describes; a failed primary action
//! propagates and writes no audit entry.

use serde_json::json;
use sqlx::PgPool;
use threadforge_shared::PlanType;
use uuid::Uuid;

use crate::audit::{AdminAction, AdminActionKind, AdminActionRecord, AuditLogger};
use crate::error::BillingResult;
use crate::subscriptions::SubscriptionService;
use crate::usage::UsageLedger;

/// Admin operations over usage and subscriptions
#[derive(Clone)]
pub struct AdminService {
    usage: UsageLedger,
    subscriptions: SubscriptionService,
    audit: AuditLogger,
}

impl AdminService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            usage: UsageLedger::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            audit: AuditLogger::new(pool),
        }
    }

    /// Apply a signed credit adjustment to the target's current-month counter
    /// and return the new total.
    ///
    /// Negative amounts decrement for real, atomically, clamped at zero by
    /// the counter update itself. Zero is rejected by the ledger before any
    /// write happens, so no audit entry is recorded for it.
    pub async fn adjust_credits(
        &self,
        admin_user_id: Uuid,
        target_user_id: Uuid,
        delta: i64,
        reason: Option<&str>,
    ) -> BillingResult<i64> {
        let new_total = self.usage.adjust_usage(target_user_id, delta).await?;

        self.audit_best_effort(
            AdminAction::new(AdminActionKind::AdjustCredits, admin_user_id, target_user_id)
                .details(json!({
                    "delta": delta,
                    "new_total": new_total,
                    "reason": reason,
                })),
        )
        .await;

        Ok(new_total)
    }

    /// Move the target onto `plan`, effective immediately for entitlement.
    ///
    /// `pro` puts the user on an active subscription (synthesizing a record
    /// when they have none); `free` cancels everything they hold.
    pub async fn change_plan(
        &self,
        admin_user_id: Uuid,
        target_user_id: Uuid,
        plan: PlanType,
        reason: Option<&str>,
    ) -> BillingResult<()> {
        let details = match plan {
            PlanType::Pro => {
                let record = self
                    .subscriptions
                    .force_active_plan(target_user_id, PlanType::Pro)
                    .await?;
                json!({
                    "plan": plan,
                    "external_subscription_id": record.external_subscription_id,
                    "reason": reason,
                })
            }
            PlanType::Free => {
                let cancelled = self.subscriptions.cancel_all_for_user(target_user_id).await?;
                json!({
                    "plan": plan,
                    "subscriptions_cancelled": cancelled,
                    "reason": reason,
                })
            }
        };

        tracing::info!(
            admin_user_id = %admin_user_id,
            target_user_id = %target_user_id,
            plan = %plan,
            "Admin changed user plan"
        );

        self.audit_best_effort(
            AdminAction::new(AdminActionKind::ChangePlan, admin_user_id, target_user_id)
                .details(details),
        )
        .await;

        Ok(())
    }

    /// Clear the target's current-month counter and purge their generation
    /// history.
    pub async fn reset_usage(
        &self,
        admin_user_id: Uuid,
        target_user_id: Uuid,
        reason: Option<&str>,
    ) -> BillingResult<()> {
        self.usage.reset_usage(target_user_id).await?;

        self.audit_best_effort(
            AdminAction::new(AdminActionKind::ResetUsage, admin_user_id, target_user_id)
                .details(json!({ "reason": reason })),
        )
        .await;

        Ok(())
    }

    /// Read side of the audit trail.
    pub async fn recent_actions(&self, limit: i64) -> BillingResult<Vec<AdminActionRecord>> {
        self.audit.list_recent(limit).await
    }

    /// Audit entries that touched one user, newest first.
    pub async fn actions_for_user(
        &self,
        target_user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<AdminActionRecord>> {
        self.audit.list_for_target(target_user_id, limit).await
    }

    async fn audit_best_effort(&self, action: AdminAction) {
        let kind = action.kind;
        let target = action.target_user_id;
        if let Err(e) = self.audit.log_action(action).await {
            tracing::warn!(
                action_kind = %kind,
                target_user_id = %target,
                error = %e,
                "Failed to record admin audit entry"
            );
        }
    }
}
