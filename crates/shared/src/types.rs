//! Common types used across ThreadForge

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Plan Catalog
// =============================================================================

/// Subscription plan for billing. The catalog here is the single source of
/// truth for credit limits; nothing else in the workspace hardcodes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Pro,
}

impl Default for PlanType {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanType {
    /// Monthly credit allowance for this plan.
    /// One credit buys one generated tweet, thread, or reply.
    pub fn monthly_credits(&self) -> i64 {
        match self {
            Self::Free => 50,
            Self::Pro => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            other => Err(format!("unknown plan type: {}", other)),
        }
    }
}

// =============================================================================
// Subscription Lifecycle
// =============================================================================

/// Lifecycle state of a subscription as reconciled from provider webhooks.
///
/// Valid transitions: pending -> active, active -> past_due, active -> cancelled,
/// past_due -> active, past_due -> cancelled. Cancelled is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the subscription can still return to active.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

/// Outcome of a provider payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Generated Content
// =============================================================================

/// Content kind a credit was spent on. Each kind has its own history table;
/// `table()` keeps that mapping in one place for inserts and purges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Tweet,
    Thread,
    Reply,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 3] = [Self::Tweet, Self::Thread, Self::Reply];

    pub fn table(&self) -> &'static str {
        match self {
            Self::Tweet => "generated_tweets",
            Self::Thread => "generated_threads",
            Self::Reply => "generated_replies",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tweet => "tweet",
            Self::Thread => "thread",
            Self::Reply => "reply",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tweet" => Ok(Self::Tweet),
            "thread" => Ok(Self::Thread),
            "reply" => Ok(Self::Reply),
            other => Err(format!("unknown generation kind: {}", other)),
        }
    }
}

// =============================================================================
// Row Models
// =============================================================================

/// A subscription row as stored. Absence of any row for a user means the
/// user is on the free plan; rows are never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_type: PlanType,
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One provider payment attempt, appended from webhook events.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub external_payment_id: String,
    pub user_id: Uuid,
    pub amount_cents: Option<i64>,
    pub status: PaymentStatus,
    pub created_at: OffsetDateTime,
}

/// One generated piece of content, stored in the kind's history table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub credits_spent: i64,
    pub created_at: OffsetDateTime,
}
