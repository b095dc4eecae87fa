//! Usage metering service
//!
//! Tracks credit consumption per user and calendar month. Every generated
//! tweet, thread, or reply consumes credits against the user's monthly
//! allowance; counters live in `usage_records` keyed by (user_id, month_key).

use sqlx::PgPool;
use threadforge_shared::{GenerationKind, GenerationRecord};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Month key for a given date, e.g. "2026-08".
///
/// Calendar months partition usage: a new month starts every user at zero
/// without any scheduled reset job.
pub fn month_key_for(date: Date) -> String {
    format!("{:04}-{:02}", date.year(), u8::from(date.month()))
}

/// Month key for the current UTC month.
pub fn current_month_key() -> String {
    month_key_for(OffsetDateTime::now_utc().date())
}

/// Usage metering service
#[derive(Clone)]
pub struct UsageLedger {
    pool: PgPool,
}

impl UsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Credits consumed by the user in the current month.
    /// A user with no row has consumed nothing; this never errors on absence.
    pub async fn get_usage(&self, user_id: Uuid) -> BillingResult<i64> {
        self.usage_for_month(user_id, &current_month_key()).await
    }

    /// Credits consumed by the user in a specific month.
    pub async fn usage_for_month(&self, user_id: Uuid, month_key: &str) -> BillingResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT credits_consumed FROM usage_records WHERE user_id = $1 AND month_key = $2",
        )
        .bind(user_id)
        .bind(month_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(c,)| c).unwrap_or(0))
    }

    /// Add `amount` credits to the user's current-month counter and return
    /// the new total.
    ///
    /// A single conditional upsert makes this safe under concurrent calls:
    /// the row is created at `amount` if absent, otherwise the add happens
    /// inside the statement. There is no read-modify-write window, so K
    /// concurrent increments always sum exactly.
    pub async fn increment_usage(&self, user_id: Uuid, amount: i64) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "increment amount must be positive, got {}",
                amount
            )));
        }

        let month_key = current_month_key();
        let (total,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO usage_records (user_id, month_key, credits_consumed)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, month_key) DO UPDATE SET
                credits_consumed = usage_records.credits_consumed + EXCLUDED.credits_consumed,
                updated_at = NOW()
            RETURNING credits_consumed
            "#,
        )
        .bind(user_id)
        .bind(&month_key)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            user_id = %user_id,
            month_key = %month_key,
            amount = amount,
            total = total,
            "Recorded credit consumption"
        );

        Ok(total)
    }

    /// Apply a signed credit adjustment to the current-month counter and
    /// return the new total.
    ///
    /// Negative deltas decrement; the counter is clamped at zero in the
    /// statement itself so a large grant can never drive it negative.
    /// Used by admin overrides, not by the generation path.
    pub async fn adjust_usage(&self, user_id: Uuid, delta: i64) -> BillingResult<i64> {
        if delta == 0 {
            return Err(BillingError::InvalidInput(
                "adjustment amount must be non-zero".to_string(),
            ));
        }

        let month_key = current_month_key();
        let (total,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO usage_records (user_id, month_key, credits_consumed)
            VALUES ($1, $2, GREATEST(0, $3))
            ON CONFLICT (user_id, month_key) DO UPDATE SET
                credits_consumed = GREATEST(0, usage_records.credits_consumed + $3),
                updated_at = NOW()
            RETURNING credits_consumed
            "#,
        )
        .bind(user_id)
        .bind(&month_key)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            month_key = %month_key,
            delta = delta,
            total = total,
            "Adjusted credit counter"
        );

        Ok(total)
    }

    /// Drop the user's current-month counter row and purge their generation
    /// history across all content kinds.
    ///
    /// Runs in one transaction so the counter and the history tables never
    /// disagree. A missing row reads as zero, so deleting it is equivalent
    /// to zeroing and keeps the table clean. Past months are left untouched.
    pub async fn reset_usage(&self, user_id: Uuid) -> BillingResult<()> {
        let month_key = current_month_key();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM usage_records WHERE user_id = $1 AND month_key = $2")
            .bind(user_id)
            .bind(&month_key)
            .execute(&mut *tx)
            .await?;

        for kind in GenerationKind::ALL {
            // Table names come from a fixed enum, never from input.
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", kind.table()))
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            month_key = %month_key,
            "Reset usage counter and purged generation history"
        );

        Ok(())
    }

    /// Append a generated piece of content to the kind's history table.
    pub async fn record_generation(
        &self,
        user_id: Uuid,
        kind: GenerationKind,
        content: &str,
        credits_spent: i64,
    ) -> BillingResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(&format!(
            r#"
            INSERT INTO {} (user_id, content, credits_spent)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
            kind.table()
        ))
        .bind(user_id)
        .bind(content)
        .bind(credits_spent)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Most recent generations of one kind for a user, newest first.
    pub async fn list_generations(
        &self,
        user_id: Uuid,
        kind: GenerationKind,
        limit: i64,
    ) -> BillingResult<Vec<GenerationRecord>> {
        let records: Vec<GenerationRecord> = sqlx::query_as(&format!(
            r#"
            SELECT id, user_id, content, credits_spent, created_at
            FROM {}
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            kind.table()
        ))
        .bind(user_id)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
