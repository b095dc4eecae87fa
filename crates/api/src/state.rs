//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;
use threadforge_billing::{
    AdminService, EntitlementPolicy, EntitlementService, PaymentLedger, SubscriptionService,
    UsageLedger, WebhookHandler,
};

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

/// Application state shared across all request handlers.
/// Each billing service holds its own clone of the pool; cloning the state
/// is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub usage: UsageLedger,
    pub entitlements: EntitlementService,
    pub subscriptions: SubscriptionService,
    pub payments: PaymentLedger,
    pub webhooks: WebhookHandler,
    pub admin: AdminService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let policy = EntitlementPolicy {
            past_due_keeps_plan: config.past_due_keeps_plan,
        };

        Self {
            usage: UsageLedger::new(pool.clone()),
            entitlements: EntitlementService::with_policy(pool.clone(), policy),
            subscriptions: SubscriptionService::new(pool.clone()),
            payments: PaymentLedger::new(pool.clone()),
            webhooks: WebhookHandler::new(pool.clone(), config.billing_webhook_secret.clone()),
            admin: AdminService::new(pool.clone()),
            config: Arc::new(config),
            pool,
        }
    }

    /// State for the auth middleware layer
    pub fn auth_state(&self) -> AuthState {
        AuthState::new(JwtManager::new(
            &self.config.jwt_secret,
            self.config.jwt_expiry_hours,
        ))
    }
}
