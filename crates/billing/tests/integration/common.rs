//! Shared helpers for the billing integration tests

use sqlx::PgPool;
use uuid::Uuid;

/// Connect to the test database.
pub async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

/// Remove every row the tests created for a user.
pub async fn cleanup_user(pool: &PgPool, user_id: Uuid) {
    // Ignore errors during cleanup
    sqlx::query("DELETE FROM usage_records WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();

    sqlx::query("DELETE FROM payments WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();

    sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();

    sqlx::query("DELETE FROM admin_actions WHERE target_user_id = $1 OR admin_user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();

    for table in ["generated_tweets", "generated_threads", "generated_replies"] {
        sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", table))
            .bind(user_id)
            .execute(pool)
            .await
            .ok();
    }
}
