#!/usr/bin/env rust-script
//! Billing Consistency Verification Script
//!
//! Detects drift in the ThreadForge metering and subscription tables.
//! Read-only; prints findings and never mutates anything.
//!
//! ## Usage
//! ```bash
//! rust-script scripts/verify_billing_consistency.rs
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string

use std::env;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("ThreadForge Billing Consistency Verification");
    println!("============================================\n");

    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    // ========================================================================
    // Check 1: Usage counters are well-formed
    // ========================================================================
    println!("Check 1: Verifying usage counters...");

    let bad_counters: Vec<(uuid::Uuid, String, i64)> = sqlx::query_as(
        r#"
        SELECT user_id, month_key, credits_consumed
        FROM usage_records
        WHERE credits_consumed < 0 OR month_key !~ '^\d{4}-\d{2}$'
        "#
    )
    .fetch_all(&pool)
    .await?;

    if bad_counters.is_empty() {
        println!("  ✓ All usage counters are non-negative with valid month keys");
    } else {
        println!("  ⚠ Found {} malformed usage records", bad_counters.len());
        for (user_id, month_key, credits) in &bad_counters {
            println!("    - {}: {} = {}", user_id, month_key, credits);
        }
    }

    // ========================================================================
    // Check 2: At most one non-cancelled subscription per user and plan
    // ========================================================================
    println!("\nCheck 2: Verifying subscription uniqueness...");

    let duplicate_subs: Vec<(uuid::Uuid, String, i64)> = sqlx::query_as(
        r#"
        SELECT user_id, plan_type, COUNT(*)
        FROM subscriptions
        WHERE status != 'cancelled'
        GROUP BY user_id, plan_type
        HAVING COUNT(*) > 1
        "#
    )
    .fetch_all(&pool)
    .await?;

    if duplicate_subs.is_empty() {
        println!("  ✓ No user holds duplicate live subscriptions on one plan");
    } else {
        println!("  ⚠ Found {} users with duplicate live subscriptions", duplicate_subs.len());
        for (user_id, plan, count) in &duplicate_subs {
            println!("    - {}: {} x{}", user_id, plan, count);
        }
    }

    // ========================================================================
    // Check 3: Active subscriptions carry a billing period
    // ========================================================================
    println!("\nCheck 3: Verifying active subscriptions have periods...");

    let missing_periods: Vec<(uuid::Uuid, String)> = sqlx::query_as(
        r#"
        SELECT user_id, external_subscription_id
        FROM subscriptions
        WHERE status = 'active'
          AND (current_period_start IS NULL OR current_period_end IS NULL)
        "#
    )
    .fetch_all(&pool)
    .await?;

    if missing_periods.is_empty() {
        println!("  ✓ Every active subscription has a billing period");
    } else {
        println!("  ⚠ Found {} active subscriptions without a period", missing_periods.len());
        for (user_id, sub_id) in &missing_periods {
            println!("    - {}: {}", user_id, sub_id);
        }
    }

    // ========================================================================
    // Check 4: Active subscriptions are not long past their period end
    // ========================================================================
    println!("\nCheck 4: Verifying renewal webhooks kept up...");

    let stale_actives: Vec<(uuid::Uuid, String)> = sqlx::query_as(
        r#"
        SELECT user_id, external_subscription_id
        FROM subscriptions
        WHERE status = 'active'
          AND current_period_end < NOW() - INTERVAL '3 days'
        "#
    )
    .fetch_all(&pool)
    .await?;

    if stale_actives.is_empty() {
        println!("  ✓ No active subscription is stuck past its period end");
    } else {
        println!("  ⚠ Found {} active subscriptions past period end", stale_actives.len());
        for (user_id, sub_id) in &stale_actives {
            println!("    - {}: {}", user_id, sub_id);
        }
    }

    // ========================================================================
    // Summary Report
    // ========================================================================
    println!("\n========================================");
    println!("Summary");
    println!("========================================");

    let total_issues = bad_counters.len()
        + duplicate_subs.len()
        + missing_periods.len()
        + stale_actives.len();

    if total_issues == 0 {
        println!("✓ No billing inconsistencies detected!");
    } else {
        println!("⚠ Found {} total issues", total_issues);
        println!("\nRecommendations:");
        println!("1. Check provider webhook delivery logs for gaps");
        println!("2. Review recent admin plan changes in admin_actions");
        println!("3. Replay missed subscription events from the provider dashboard");
    }

    Ok(())
}
