//! Payment history ledger
//!
//! Append-only record of provider payment outcomes. A payment event never
//! changes subscription status by itself; the provider sends a separate
//! lifecycle event for that.

use sqlx::PgPool;
use threadforge_shared::{PaymentRecord, PaymentStatus};
use uuid::Uuid;

use crate::error::BillingResult;

/// Payment record persistence
#[derive(Clone)]
pub struct PaymentLedger {
    pool: PgPool,
}

impl PaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one payment outcome. The provider's payment id is the
    /// idempotency key; returns false when the payment was already recorded
    /// and nothing was inserted.
    pub async fn record_payment(
        &self,
        external_payment_id: &str,
        user_id: Uuid,
        amount_cents: Option<i64>,
        status: PaymentStatus,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (external_payment_id, user_id, amount_cents, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_payment_id) DO NOTHING
            "#,
        )
        .bind(external_payment_id)
        .bind(user_id)
        .bind(amount_cents)
        .bind(status)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::info!(
                user_id = %user_id,
                external_payment_id = external_payment_id,
                status = %status,
                "Recorded payment"
            );
        } else {
            tracing::debug!(
                external_payment_id = external_payment_id,
                "Payment already recorded, skipping"
            );
        }

        Ok(inserted)
    }

    /// Most recent payments for a user, newest first.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<PaymentRecord>> {
        let records: Vec<PaymentRecord> = sqlx::query_as(
            r#"
            SELECT id, external_payment_id, user_id, amount_cents, status, created_at
            FROM payments
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
