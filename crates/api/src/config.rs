//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Billing provider
    pub billing_webhook_secret: String,

    // Entitlement policy
    pub past_due_keeps_plan: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                // Signing keys shorter than 32 bytes are brute-forceable
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Billing provider
            billing_webhook_secret: {
                let secret = env::var("BILLING_WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::Missing("BILLING_WEBHOOK_SECRET"))?;
                // Same strength floor as the JWT key; this secret authenticates
                // every state change the payment provider pushes at us
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "BILLING_WEBHOOK_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Entitlement policy
            past_due_keeps_plan: env::var("PAST_DUE_KEEPS_PLAN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
