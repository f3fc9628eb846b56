//! Billing error taxonomy.
//!
//! Variants map onto the HTTP behavior of the two handlers: configuration
//! errors are the only 500s, signature failures the only webhook 400s, and
//! everything else surfaces as a descriptive message in a 400 response or is
//! recorded against the webhook event row.

use renderloft_shared::PlanTier;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Billing configuration error: {0}")]
    Config(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Unsupported webhook event object: {0}")]
    WebhookEventNotSupported(String),

    #[error("No user found for customer ID {0}")]
    CustomerNotFound(String),

    #[error("No active subscription found for user {0}")]
    SubscriptionNotFound(String),

    #[error("Invalid plan tier: {0}")]
    InvalidPlan(String),

    #[error("Invalid billing cycle: {0}")]
    InvalidCycle(String),

    #[error("No price configured for {tier} ({cycle})")]
    PriceNotConfigured { tier: String, cycle: String },

    #[error("Already on target plan")]
    AlreadyOnPlan,

    #[error("Changing from {from} to {to} is not a downgrade - use the upgrade flow instead")]
    NotADowngrade { from: PlanTier, to: PlanTier },

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal billing error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}
