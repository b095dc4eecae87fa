//! Payment provider webhook reconciliation
//!
//! Verifies webhook signatures, decodes provider events, and applies them to
//! the subscription store and payment ledger. Handlers are idempotent and
//! order-tolerant: every event asserts the end state it implies, so
//! redelivered or reordered deliveries converge on the same stored state.
//! Events this system cannot act on (unknown types, subscriptions it never
//! saw) are logged and dropped so the provider stops retrying them.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::payments::PaymentLedger;
use crate::subscriptions::SubscriptionService;
use threadforge_shared::PaymentStatus;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signature timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

// =============================================================================
// Signature Verification
// =============================================================================

/// Verify a webhook signature header against the raw request body.
///
/// Header format: `t=<unix seconds>,v1=<hex hmac-sha256 of "{t}.{body}">`.
/// The timestamp bounds replay of captured requests; the digest comparison is
/// constant-time. Nothing in the body may be trusted before this passes.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    signature_header: &str,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => timestamp = value.parse().ok(),
            (Some("v1"), Some(value)) => signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    let signature = signature.ok_or(BillingError::WebhookSignatureInvalid)?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
        Ok(())
    } else {
        Err(BillingError::WebhookSignatureInvalid)
    }
}

/// Build a signature header for `payload` at `timestamp`.
///
/// Counterpart to [`verify_signature`] for tooling and tests that need to
/// send signed requests.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Internal(format!("HMAC key error: {}", e)))?;
    mac.update(signed_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={},v1={}", timestamp, signature))
}

// =============================================================================
// Provider Events
// =============================================================================

/// Raw webhook envelope: `{"type": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Metadata blob the checkout flow attaches to provider objects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    pub user_id: Option<Uuid>,
}

/// Payload fields shared by subscription lifecycle events.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionEventData {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    /// Unix seconds
    pub current_period_start: Option<i64>,
    /// Unix seconds
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Payload fields for payment outcome events.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    pub payment_id: String,
    pub subscription_id: Option<String>,
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// A provider event decoded from the webhook envelope.
///
/// Types this system does not recognize land in `Unknown` instead of failing
/// the decode, so new provider event types degrade to an acknowledged no-op
/// rather than an error the provider keeps retrying.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    SubscriptionActive(SubscriptionEventData),
    SubscriptionRenewed(SubscriptionEventData),
    SubscriptionFailed(SubscriptionEventData),
    SubscriptionOnHold(SubscriptionEventData),
    SubscriptionCancelled(SubscriptionEventData),
    PaymentSucceeded(PaymentEventData),
    PaymentFailed(PaymentEventData),
    Unknown { event_type: String },
}

impl ProviderEvent {
    /// Decode a raw webhook body into a typed event.
    pub fn parse(payload: &str) -> BillingResult<Self> {
        let envelope: EventEnvelope = serde_json::from_str(payload)
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

        let event = match envelope.event_type.as_str() {
            "subscription.active" => Self::SubscriptionActive(subscription_data(envelope.data)?),
            "subscription.renewed" => Self::SubscriptionRenewed(subscription_data(envelope.data)?),
            "subscription.failed" => Self::SubscriptionFailed(subscription_data(envelope.data)?),
            "subscription.on_hold" => Self::SubscriptionOnHold(subscription_data(envelope.data)?),
            "subscription.cancelled" => {
                Self::SubscriptionCancelled(subscription_data(envelope.data)?)
            }
            "payment.succeeded" => Self::PaymentSucceeded(payment_data(envelope.data)?),
            "payment.failed" => Self::PaymentFailed(payment_data(envelope.data)?),
            _ => Self::Unknown {
                event_type: envelope.event_type,
            },
        };

        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::SubscriptionActive(_) => "subscription.active",
            Self::SubscriptionRenewed(_) => "subscription.renewed",
            Self::SubscriptionFailed(_) => "subscription.failed",
            Self::SubscriptionOnHold(_) => "subscription.on_hold",
            Self::SubscriptionCancelled(_) => "subscription.cancelled",
            Self::PaymentSucceeded(_) => "payment.succeeded",
            Self::PaymentFailed(_) => "payment.failed",
            Self::Unknown { event_type } => event_type,
        }
    }
}

fn subscription_data(data: Value) -> BillingResult<SubscriptionEventData> {
    serde_json::from_value(data).map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))
}

fn payment_data(data: Value) -> BillingResult<PaymentEventData> {
    serde_json::from_value(data).map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))
}

fn unix_ts(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

// =============================================================================
// Webhook Handler
// =============================================================================

/// Applies verified provider events to storage.
#[derive(Clone)]
pub struct WebhookHandler {
    subscriptions: SubscriptionService,
    payments: PaymentLedger,
    secret: String,
}

impl WebhookHandler {
    pub fn new(pool: PgPool, secret: String) -> Self {
        Self {
            subscriptions: SubscriptionService::new(pool.clone()),
            payments: PaymentLedger::new(pool),
            secret,
        }
    }

    /// Verify the signature header, then decode the body into a typed event.
    pub fn verify_and_parse(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> BillingResult<ProviderEvent> {
        verify_signature(&self.secret, payload, signature_header)?;
        ProviderEvent::parse(payload)
    }

    /// Apply one event to storage.
    ///
    /// Only storage failures return an error (the HTTP layer turns those into
    /// a retryable 500). Unknown types and events for subscriptions this
    /// system never saw resolve Ok after logging, which acknowledges them.
    pub async fn handle_event(&self, event: ProviderEvent) -> BillingResult<()> {
        match event {
            ProviderEvent::SubscriptionActive(data) => {
                let matched = self
                    .subscriptions
                    .mark_active(
                        &data.subscription_id,
                        unix_ts(data.current_period_start),
                        unix_ts(data.current_period_end),
                    )
                    .await?;
                log_transition("subscription.active", &data.subscription_id, matched);
            }
            ProviderEvent::SubscriptionRenewed(data) => {
                let matched = self
                    .subscriptions
                    .mark_renewed(
                        &data.subscription_id,
                        unix_ts(data.current_period_start),
                        unix_ts(data.current_period_end),
                    )
                    .await?;
                log_transition("subscription.renewed", &data.subscription_id, matched);
            }
            ProviderEvent::SubscriptionFailed(data) => {
                let matched = self.subscriptions.mark_past_due(&data.subscription_id).await?;
                log_transition("subscription.failed", &data.subscription_id, matched);
            }
            ProviderEvent::SubscriptionOnHold(data) => {
                let matched = self.subscriptions.mark_past_due(&data.subscription_id).await?;
                log_transition("subscription.on_hold", &data.subscription_id, matched);
            }
            ProviderEvent::SubscriptionCancelled(data) => {
                let matched = self.subscriptions.mark_cancelled(&data.subscription_id).await?;
                log_transition("subscription.cancelled", &data.subscription_id, matched);
            }
            ProviderEvent::PaymentSucceeded(data) => {
                self.apply_payment(data, PaymentStatus::Succeeded).await?;
            }
            ProviderEvent::PaymentFailed(data) => {
                self.apply_payment(data, PaymentStatus::Failed).await?;
            }
            ProviderEvent::Unknown { event_type } => {
                tracing::info!(
                    event_type = %event_type,
                    "Ignoring unknown webhook event type"
                );
            }
        }

        Ok(())
    }

    /// Append a payment record. The subscription's status is never touched
    /// here; the provider sends a separate lifecycle event for that.
    async fn apply_payment(
        &self,
        data: PaymentEventData,
        status: PaymentStatus,
    ) -> BillingResult<()> {
        let Some(user_id) = self.resolve_payment_user(&data).await? else {
            tracing::warn!(
                external_payment_id = %data.payment_id,
                "Dropping payment event with no resolvable user"
            );
            return Ok(());
        };

        self.payments
            .record_payment(&data.payment_id, user_id, data.amount_cents, status)
            .await?;

        Ok(())
    }

    /// Attribute a payment to a user: through its subscription when the
    /// payload names one we know, else through checkout metadata.
    async fn resolve_payment_user(&self, data: &PaymentEventData) -> BillingResult<Option<Uuid>> {
        if let Some(subscription_id) = &data.subscription_id {
            if let Some(user_id) = self.subscriptions.user_for_external(subscription_id).await? {
                return Ok(Some(user_id));
            }
        }
        Ok(data.metadata.user_id)
    }
}

fn log_transition(event_type: &str, external_subscription_id: &str, matched: bool) {
    if matched {
        tracing::info!(
            event_type = event_type,
            external_subscription_id = external_subscription_id,
            "Applied subscription transition"
        );
    } else {
        tracing::warn!(
            event_type = event_type,
            external_subscription_id = external_subscription_id,
            "Dropping event for unknown subscription"
        );
    }
}
