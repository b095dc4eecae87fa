//! Admin action audit trail
//!
//! Every admin override appends a row to `admin_actions` describing who did
//! what to whom. Writes are best-effort by contract: callers log and continue
//! when an append fails, and never roll back the action it describes.

use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Kind of admin override being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminActionKind {
    AdjustCredits,
    ChangePlan,
    ResetUsage,
}

impl AdminActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdjustCredits => "adjust_credits",
            Self::ChangePlan => "change_plan",
            Self::ResetUsage => "reset_usage",
        }
    }
}

impl std::fmt::Display for AdminActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for an audit entry
#[derive(Debug, Clone)]
pub struct AdminAction {
    pub kind: AdminActionKind,
    pub admin_user_id: Uuid,
    pub target_user_id: Uuid,
    pub details: Value,
}

impl AdminAction {
    pub fn new(kind: AdminActionKind, admin_user_id: Uuid, target_user_id: Uuid) -> Self {
        Self {
            kind,
            admin_user_id,
            target_user_id,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach structured details (deltas, plans, reasons).
    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// A persisted audit entry
#[derive(Debug, Clone)]
pub struct AdminActionRecord {
    pub id: i64,
    pub admin_user_id: Uuid,
    pub action_kind: String,
    pub target_user_id: Uuid,
    pub details: Value,
    pub created_at: OffsetDateTime,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AdminActionRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            admin_user_id: row.try_get("admin_user_id")?,
            action_kind: row.try_get("action_kind")?,
            target_user_id: row.try_get("target_user_id")?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Audit trail persistence
#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one audit entry and return its id.
    pub async fn log_action(&self, action: AdminAction) -> BillingResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO admin_actions (admin_user_id, action_kind, target_user_id, details)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(action.admin_user_id)
        .bind(action.kind.as_str())
        .bind(action.target_user_id)
        .bind(&action.details)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = id,
            action_kind = %action.kind,
            admin_user_id = %action.admin_user_id,
            target_user_id = %action.target_user_id,
            "Recorded admin action"
        );

        Ok(id)
    }

    /// Most recent audit entries, newest first.
    pub async fn list_recent(&self, limit: i64) -> BillingResult<Vec<AdminActionRecord>> {
        let records: Vec<AdminActionRecord> = sqlx::query_as(
            r#"
            SELECT id, admin_user_id, action_kind, target_user_id, details, created_at
            FROM admin_actions
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Audit entries touching one user, newest first.
    pub async fn list_for_target(
        &self,
        target_user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<AdminActionRecord>> {
        let records: Vec<AdminActionRecord> = sqlx::query_as(
            r#"
            SELECT id, admin_user_id, action_kind, target_user_id, details, created_at
            FROM admin_actions
            WHERE target_user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(target_user_id)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
