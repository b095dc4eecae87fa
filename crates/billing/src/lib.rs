//! ThreadForge Billing
//!
//! Usage metering, entitlement evaluation, and subscription lifecycle for the
//! ThreadForge platform. Provider webhooks reconcile subscription state; the
//! entitlement evaluator gates content generation against the plan catalog's
//! monthly credit limits; admin overrides ride on top with an audit trail.

pub mod admin;
pub mod audit;
pub mod entitlement;
pub mod error;
pub mod payments;
pub mod subscriptions;
pub mod usage;
pub mod webhooks;

pub use admin::AdminService;
pub use audit::{AdminAction, AdminActionKind, AdminActionRecord, AuditLogger};
pub use entitlement::{Entitlement, EntitlementPolicy, EntitlementService};
pub use error::{BillingError, BillingResult};
pub use payments::PaymentLedger;
pub use subscriptions::SubscriptionService;
pub use usage::{current_month_key, month_key_for, UsageLedger};
pub use webhooks::{sign_payload, verify_signature, ProviderEvent, WebhookHandler};
