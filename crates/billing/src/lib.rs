// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries descriptive variants
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Renderloft Billing Module
//!
//! Handles Stripe integration for license records and plan changes.
//!
//! ## Features
//!
//! - **Webhook Ingest**: verify, deduplicate, and reconcile subscription
//!   lifecycle events into per-user license records
//! - **Downgrade Scheduling**: defer plan downgrades to the next billing
//!   boundary via phased subscription schedules (no mid-cycle proration)
//! - **Audit Log**: append-only record of billing state changes
//! - **Rate Limiting**: in-memory fixed-window counters over hashed keys
//! - **Invariants**: runnable consistency checks over the license cache

pub mod client;
pub mod error;
pub mod events;
pub mod invariants;
pub mod license;
pub mod rate_limit;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActorType, AuditAction, AuditEntryBuilder, AuditLogger};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// License
pub use license::{cycle_for_interval, status_for_stripe, LicenseRecord, LicenseService};

// Rate Limit
pub use rate_limit::{RateLimitResult, RateLimiter};

// Subscriptions
pub use subscriptions::{check_downgrade_direction, ScheduledDowngrade, SubscriptionService};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality.
pub struct BillingService {
    pub audit: AuditLogger,
    pub invariants: InvariantChecker,
    pub licenses: LicenseService,
    pub rate_limiter: RateLimiter,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new_with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config.
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::new_with_client(StripeClient::new(config), pool)
    }

    fn new_with_client(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            audit: AuditLogger::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            licenses: LicenseService::new(stripe.clone(), pool.clone()),
            rate_limiter: RateLimiter::new_in_memory(),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
