//! Integration tests for webhook-driven subscription reconciliation
//!
//! These tests drive the reconciler with decoded provider events and verify
//! the end-state semantics: duplicates converge, out-of-order deliveries
//! converge, unknown subscriptions are dropped without side effects, and
//! payment events never move subscription status.
//!
//! ## Running Tests
//! ```bash
//! # Requires Postgres with migrations applied
//! export DATABASE_URL="postgres://localhost/threadforge_test"
//! cargo test --test integration -- --ignored --test-threads=1
//! ```

use serde_json::json;
use sqlx::PgPool;
use threadforge_billing::{
    BillingError, EntitlementService, ProviderEvent, SubscriptionService, WebhookHandler,
};
use threadforge_shared::PlanType;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::common::{cleanup_user, setup_pool};

// ============================================================================
// Test Utilities
// ============================================================================

const TEST_SECRET: &str = "whsec_integration_test";

fn handler(pool: &PgPool) -> WebhookHandler {
    WebhookHandler::new(pool.clone(), TEST_SECRET.to_string())
}

/// Decode a minimal subscription event of the given type.
fn subscription_event(event_type: &str, subscription_id: &str) -> ProviderEvent {
    let payload = json!({
        "type": event_type,
        "data": { "subscription_id": subscription_id }
    })
    .to_string();
    ProviderEvent::parse(&payload).expect("Test payload should parse")
}

/// Decode a payment event tied to a subscription.
fn payment_event(event_type: &str, payment_id: &str, subscription_id: &str) -> ProviderEvent {
    let payload = json!({
        "type": event_type,
        "data": {
            "payment_id": payment_id,
            "subscription_id": subscription_id,
            "amount_cents": 1900
        }
    })
    .to_string();
    ProviderEvent::parse(&payload).expect("Test payload should parse")
}

async fn fetch_status(pool: &PgPool, external_id: &str) -> String {
    sqlx::query_scalar("SELECT status FROM subscriptions WHERE external_subscription_id = $1")
        .bind(external_id)
        .fetch_one(pool)
        .await
        .expect("Subscription row should exist")
}

// ============================================================================
// Test Cases: Activation
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_pending_subscription_activates() {
    // Given: A pending subscription registered at checkout
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, Some("cus_test"))
        .await
        .expect("create_pending failed");
    assert_eq!(fetch_status(&pool, &ext_id).await, "pending");

    // When: The provider confirms activation
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // Then: The row is active with a ~30 day period
    assert_eq!(fetch_status(&pool, &ext_id).await, "active");

    let period_end: Option<OffsetDateTime> = sqlx::query_scalar(
        "SELECT current_period_end FROM subscriptions WHERE external_subscription_id = $1",
    )
    .bind(&ext_id)
    .fetch_one(&pool)
    .await
    .expect("Failed to fetch period end");

    let days = (period_end.expect("Period end should be set") - OffsetDateTime::now_utc())
        .whole_days();
    assert!(
        (29..=31).contains(&days),
        "Default period should be ~30 days, got {} days",
        days
    );

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore]
async fn test_activation_honors_payload_period() {
    // Given: A pending subscription
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");

    // When: Activation carries explicit period bounds
    let start = 1_900_000_000_i64;
    let end = 1_902_592_000_i64;
    let payload = json!({
        "type": "subscription.active",
        "data": {
            "subscription_id": ext_id,
            "current_period_start": start,
            "current_period_end": end
        }
    })
    .to_string();
    let event = ProviderEvent::parse(&payload).expect("Test payload should parse");

    handler(&pool).handle_event(event).await.expect("handle_event failed");

    // Then: The stored period matches the payload to the second
    let stored_end: Option<OffsetDateTime> = sqlx::query_scalar(
        "SELECT current_period_end FROM subscriptions WHERE external_subscription_id = $1",
    )
    .bind(&ext_id)
    .fetch_one(&pool)
    .await
    .expect("Failed to fetch period end");

    assert_eq!(
        stored_end.expect("Period end should be set").unix_timestamp(),
        end
    );

    cleanup_user(&pool, user_id).await;
}

// ============================================================================
// Test Cases: Idempotency and Ordering
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_duplicate_activation_converges() {
    // Given: An already-active subscription
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");

    // When: The same activation is delivered twice
    for _ in 0..2 {
        handler(&pool)
            .handle_event(subscription_event("subscription.active", &ext_id))
            .await
            .expect("handle_event failed");
    }

    // Then: Still exactly one row, still active
    let row_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE external_subscription_id = $1")
            .bind(&ext_id)
            .fetch_one(&pool)
            .await
            .expect("Failed to count rows");
    assert_eq!(row_count, 1, "Duplicate delivery must not create rows");
    assert_eq!(fetch_status(&pool, &ext_id).await, "active");

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore]
async fn test_renewal_delivered_before_activation_ends_active() {
    // Given: A pending subscription whose renewal arrives first
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");

    // When: Renewal, then the original activation, out of order
    handler(&pool)
        .handle_event(subscription_event("subscription.renewed", &ext_id))
        .await
        .expect("handle_event failed");
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // Then: Both assert the same end state
    assert_eq!(fetch_status(&pool, &ext_id).await, "active");

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore]
async fn test_failed_charge_flows_to_past_due_and_back() {
    // Given: An active subscription
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // When: A charge fails
    handler(&pool)
        .handle_event(subscription_event("subscription.failed", &ext_id))
        .await
        .expect("handle_event failed");
    assert_eq!(fetch_status(&pool, &ext_id).await, "past_due");

    // And the next renewal succeeds
    handler(&pool)
        .handle_event(subscription_event("subscription.renewed", &ext_id))
        .await
        .expect("handle_event failed");

    // Then: The subscription recovers to active
    assert_eq!(fetch_status(&pool, &ext_id).await, "active");

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore]
async fn test_cancellation_keeps_row_as_history() {
    // Given: An active subscription
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // When: The provider cancels it
    handler(&pool)
        .handle_event(subscription_event("subscription.cancelled", &ext_id))
        .await
        .expect("handle_event failed");

    // Then: The row survives as history, marked cancelled
    assert_eq!(fetch_status(&pool, &ext_id).await, "cancelled");

    // And it no longer counts as the user's current subscription
    let current = subscriptions
        .current_for_user(user_id)
        .await
        .expect("current_for_user failed");
    assert!(current.is_none(), "Cancelled rows are history, not current");

    cleanup_user(&pool, user_id).await;
}

// ============================================================================
// Test Cases: Drops and Unknowns
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_event_for_unknown_subscription_is_dropped() {
    // Given: A subscription id this system never saw
    let pool = setup_pool().await;
    let ext_id = format!("sub_never_seen_{}", Uuid::new_v4());

    // When: A recognized event arrives for it
    let result = handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await;

    // Then: The event is acknowledged without creating state
    assert!(result.is_ok(), "Unmatched events must not error");

    let row_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE external_subscription_id = $1")
            .bind(&ext_id)
            .fetch_one(&pool)
            .await
            .expect("Failed to count rows");
    assert_eq!(row_count, 0, "Dropped events must not insert rows");
}

#[tokio::test]
#[ignore]
async fn test_unknown_event_type_is_acknowledged() {
    // Given: An event type this system does not handle
    let pool = setup_pool().await;
    let payload = json!({
        "type": "invoice.finalized",
        "data": { "invoice_id": "inv_1" }
    })
    .to_string();
    let event = ProviderEvent::parse(&payload).expect("Unknown types still parse");

    // When/Then: Handling it succeeds as a no-op
    assert!(handler(&pool).handle_event(event).await.is_ok());
}

// ============================================================================
// Test Cases: Payments
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_payment_events_append_without_moving_status() {
    // Given: An active subscription
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());
    let payment_id = format!("pay_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // When: A failed payment event arrives, twice
    for _ in 0..2 {
        handler(&pool)
            .handle_event(payment_event("payment.failed", &payment_id, &ext_id))
            .await
            .expect("handle_event failed");
    }

    // Then: Exactly one ledger row, attributed through the subscription
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payments WHERE external_payment_id = $1 AND user_id = $2",
    )
    .bind(&payment_id)
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .expect("Failed to count payment rows");
    assert_eq!(count, 1, "Redelivered payment must not duplicate");

    let status: String =
        sqlx::query_scalar("SELECT status FROM payments WHERE external_payment_id = $1")
            .bind(&payment_id)
            .fetch_one(&pool)
            .await
            .expect("Failed to fetch payment status");
    assert_eq!(status, "failed");

    // And the subscription status did not move
    assert_eq!(
        fetch_status(&pool, &ext_id).await,
        "active",
        "Payment records never change subscription status"
    );

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore]
async fn test_payment_with_no_resolvable_user_is_dropped() {
    // Given: A payment naming an unknown subscription and carrying no metadata
    let pool = setup_pool().await;
    let payment_id = format!("pay_{}", Uuid::new_v4());
    let unknown_sub = format!("sub_never_seen_{}", Uuid::new_v4());

    // When: The event is handled
    let result = handler(&pool)
        .handle_event(payment_event("payment.succeeded", &payment_id, &unknown_sub))
        .await;

    // Then: It is acknowledged and nothing lands in the ledger
    assert!(result.is_ok(), "Unattributable payments must not error");

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE external_payment_id = $1")
            .bind(&payment_id)
            .fetch_one(&pool)
            .await
            .expect("Failed to count payment rows");
    assert_eq!(count, 0, "Dropped payments must not insert rows");
}

#[tokio::test]
#[ignore]
async fn test_payment_attributed_through_metadata_fallback() {
    // Given: A payment with no known subscription but checkout metadata
    let pool = setup_pool().await;
    let user_id = Uuid::new_v4();
    let payment_id = format!("pay_{}", Uuid::new_v4());

    let payload = json!({
        "type": "payment.succeeded",
        "data": {
            "payment_id": payment_id,
            "amount_cents": 1900,
            "metadata": { "user_id": user_id }
        }
    })
    .to_string();
    let event = ProviderEvent::parse(&payload).expect("Test payload should parse");

    // When: The event is handled
    handler(&pool).handle_event(event).await.expect("handle_event failed");

    // Then: The row is attributed to the metadata user
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payments WHERE external_payment_id = $1 AND user_id = $2",
    )
    .bind(&payment_id)
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .expect("Failed to count payment rows");
    assert_eq!(count, 1);

    cleanup_user(&pool, user_id).await;
}

// ============================================================================
// Test Cases: Creation Conflicts and Entitlement
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_second_pro_subscription_conflicts() {
    // Given: A user already on an active pro subscription
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // When: A second pro checkout is attempted
    let other_ext = format!("sub_{}", Uuid::new_v4());
    let result = subscriptions
        .create_pending(user_id, PlanType::Pro, &other_ext, None)
        .await;

    // Then: The creation is rejected as a conflict
    match result {
        Err(BillingError::AlreadyExists(_)) => {}
        other => panic!("Expected AlreadyExists, got {:?}", other),
    }

    cleanup_user(&pool, user_id).await;
}

#[tokio::test]
#[ignore]
async fn test_entitlement_follows_lifecycle() {
    // Given: A user whose subscription goes active then cancelled
    let pool = setup_pool().await;
    let subscriptions = SubscriptionService::new(pool.clone());
    let entitlements = EntitlementService::new(pool.clone());
    let user_id = Uuid::new_v4();
    let ext_id = format!("sub_{}", Uuid::new_v4());

    subscriptions
        .create_pending(user_id, PlanType::Pro, &ext_id, None)
        .await
        .expect("create_pending failed");

    // Pending confers nothing yet
    let before = entitlements.evaluate(user_id).await.expect("evaluate failed");
    assert_eq!(before.limit, 50, "Pending subscriptions stay on free limits");

    // When: Activation lands
    handler(&pool)
        .handle_event(subscription_event("subscription.active", &ext_id))
        .await
        .expect("handle_event failed");

    // Then: The pro limit applies immediately
    let active = entitlements.evaluate(user_id).await.expect("evaluate failed");
    assert_eq!(active.limit, 500);
    assert_eq!(active.plan_type, PlanType::Pro);

    // And cancellation reverts to free
    handler(&pool)
        .handle_event(subscription_event("subscription.cancelled", &ext_id))
        .await
        .expect("handle_event failed");

    let after = entitlements.evaluate(user_id).await.expect("evaluate failed");
    assert_eq!(after.limit, 50);
    assert_eq!(after.plan_type, PlanType::Free);

    cleanup_user(&pool, user_id).await;
}
