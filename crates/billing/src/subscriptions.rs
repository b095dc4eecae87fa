//! Subscription lifecycle store
//!
//! Persists subscription rows keyed by the payment provider's subscription id
//! and applies status changes reconciled from webhooks. Every transition
//! asserts the end state its event implies, so replayed and reordered
//! deliveries converge on the same row. Rows are never hard-deleted; a user
//! with no row (or only cancelled rows) is implicitly on the free plan.

use sqlx::PgPool;
use threadforge_shared::{PlanType, SubscriptionRecord};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{is_unique_violation, BillingError, BillingResult};

/// Billing period bounds for an activation or renewal.
///
/// Events may omit period bounds; absent values fall back to a period opening
/// now and closing 30 days out, matching the provider's monthly cycle.
pub fn resolve_period(
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> (OffsetDateTime, OffsetDateTime) {
    let period_start = start.unwrap_or(now);
    let period_end = end.unwrap_or(period_start + Duration::days(30));
    (period_start, period_end)
}

/// Subscription persistence and lifecycle transitions
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new subscription in `pending`, keyed by the provider's id.
    ///
    /// Rejected with a conflict when the user already holds an active
    /// subscription on the same plan, or when the provider id was already
    /// registered.
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        plan_type: PlanType,
        external_subscription_id: &str,
        external_customer_id: Option<&str>,
    ) -> BillingResult<SubscriptionRecord> {
        if external_subscription_id.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "external subscription id must not be empty".to_string(),
            ));
        }

        let (active_count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM subscriptions
            WHERE user_id = $1 AND plan_type = $2 AND status = 'active'
            "#,
        )
        .bind(user_id)
        .bind(plan_type)
        .fetch_one(&self.pool)
        .await?;

        if active_count > 0 {
            return Err(BillingError::AlreadyExists(format!(
                "user already has an active {} subscription",
                plan_type
            )));
        }

        let record: SubscriptionRecord = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (user_id, plan_type, external_subscription_id, external_customer_id, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING id, user_id, plan_type, external_subscription_id, external_customer_id,
                      status, current_period_start, current_period_end, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(plan_type)
        .bind(external_subscription_id)
        .bind(external_customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::AlreadyExists(format!(
                    "subscription {} already registered",
                    external_subscription_id
                ))
            } else {
                BillingError::from(e)
            }
        })?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %record.id,
            external_subscription_id = external_subscription_id,
            plan_type = %plan_type,
            "Created pending subscription"
        );

        Ok(record)
    }

    /// The user's most recent non-cancelled subscription, if any.
    pub async fn current_for_user(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> = sqlx::query_as(
            r#"
            SELECT id, user_id, plan_type, external_subscription_id, external_customer_id,
                   status, current_period_start, current_period_end, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1 AND status != 'cancelled'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Owner of the subscription with the given provider id.
    pub async fn user_for_external(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM subscriptions WHERE external_subscription_id = $1",
        )
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Assert `active` with the given billing period. Returns false when no
    /// subscription matched the provider id.
    pub async fn mark_active(
        &self,
        external_subscription_id: &str,
        period_start: Option<OffsetDateTime>,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        self.set_active_with_period(external_subscription_id, period_start, period_end)
            .await
    }

    /// Assert `active` with a refreshed billing period from a renewal.
    /// Identical end state to `mark_active`, which is what makes a renewal
    /// delivered before its activation harmless.
    pub async fn mark_renewed(
        &self,
        external_subscription_id: &str,
        period_start: Option<OffsetDateTime>,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        self.set_active_with_period(external_subscription_id, period_start, period_end)
            .await
    }

    async fn set_active_with_period(
        &self,
        external_subscription_id: &str,
        period_start: Option<OffsetDateTime>,
        period_end: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        let (start, end) = resolve_period(period_start, period_end, OffsetDateTime::now_utc());

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active', current_period_start = $2, current_period_end = $3, updated_at = NOW()
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Assert `past_due` after a failed or held charge.
    pub async fn mark_past_due(&self, external_subscription_id: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due', updated_at = NOW()
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Assert `cancelled`. The row stays behind as history; entitlement
    /// treats the user as free from here on.
    pub async fn mark_cancelled(&self, external_subscription_id: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', updated_at = NOW()
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put a user on an active subscription for `plan_type`, reusing their
    /// most recent non-cancelled record or synthesizing one keyed
    /// `admin_{uuid}`. Serves the admin override path, not reconciliation.
    pub async fn force_active_plan(
        &self,
        user_id: Uuid,
        plan_type: PlanType,
    ) -> BillingResult<SubscriptionRecord> {
        let (start, end) = resolve_period(None, None, OffsetDateTime::now_utc());

        let record = match self.current_for_user(user_id).await? {
            Some(existing) => {
                sqlx::query_as(
                    r#"
                    UPDATE subscriptions
                    SET plan_type = $2, status = 'active',
                        current_period_start = $3, current_period_end = $4, updated_at = NOW()
                    WHERE id = $1
                    RETURNING id, user_id, plan_type, external_subscription_id, external_customer_id,
                              status, current_period_start, current_period_end, created_at, updated_at
                    "#,
                )
                .bind(existing.id)
                .bind(plan_type)
                .bind(start)
                .bind(end)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                let external_id = format!("admin_{}", Uuid::new_v4());
                sqlx::query_as(
                    r#"
                    INSERT INTO subscriptions
                        (user_id, plan_type, external_subscription_id, status,
                         current_period_start, current_period_end)
                    VALUES ($1, $2, $3, 'active', $4, $5)
                    RETURNING id, user_id, plan_type, external_subscription_id, external_customer_id,
                              status, current_period_start, current_period_end, created_at, updated_at
                    "#,
                )
                .bind(user_id)
                .bind(plan_type)
                .bind(&external_id)
                .bind(start)
                .bind(end)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(record)
    }

    /// Cancel every non-cancelled subscription the user holds. Returns how
    /// many rows changed; zero means the user was already on free.
    pub async fn cancel_all_for_user(&self, user_id: Uuid) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', updated_at = NOW()
            WHERE user_id = $1 AND status != 'cancelled'
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
