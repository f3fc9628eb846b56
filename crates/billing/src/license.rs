//! License record reconciliation.
//!
//! The license row is a read-optimized cache of Stripe subscription state.
//! Every field written here derives from the latest Stripe event or a live
//! subscription fetch through the fixed mapping tables below; nothing is
//! computed from local business rules, so the cache cannot drift from what
//! Stripe is actually charging.

use sqlx::PgPool;
use stripe::{RecurringInterval, Subscription, SubscriptionStatus as StripeSubStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use renderloft_shared::{BillingCycle, LicenseStatus, PlanTier};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Fixed status map: Stripe subscription status to license status.
///
/// Deletion events do not consult this table; they force `canceled`
/// regardless of the payload's nominal status.
pub fn status_for_stripe(status: StripeSubStatus) -> LicenseStatus {
    match status {
        StripeSubStatus::Active => LicenseStatus::Active,
        StripeSubStatus::Trialing => LicenseStatus::Trial,
        StripeSubStatus::PastDue => LicenseStatus::PastDue,
        StripeSubStatus::Canceled => LicenseStatus::Canceled,
        StripeSubStatus::Unpaid => LicenseStatus::Canceled,
        StripeSubStatus::IncompleteExpired => LicenseStatus::Canceled,
        StripeSubStatus::Incomplete => LicenseStatus::None,
        StripeSubStatus::Paused => LicenseStatus::None,
    }
}

/// Fixed cycle map: recurring interval to billing cycle.
pub fn cycle_for_interval(interval: Option<RecurringInterval>) -> BillingCycle {
    match interval {
        Some(RecurringInterval::Month) => BillingCycle::Monthly,
        Some(RecurringInterval::Year) => BillingCycle::Yearly,
        _ => BillingCycle::None,
    }
}

/// Price id of the subscription's first item, if any.
pub(crate) fn primary_price_id(subscription: &Subscription) -> Option<String> {
    subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|p| p.id.to_string())
}

/// Recurring interval of the subscription's first item, if any.
pub(crate) fn primary_interval(subscription: &Subscription) -> Option<RecurringInterval> {
    subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .and_then(|p| p.recurring.as_ref())
        .map(|r| r.interval)
}

/// Customer id behind an expandable customer reference.
pub(crate) fn customer_id(subscription: &Subscription) -> String {
    match &subscription.customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(c) => c.id.to_string(),
    }
}

/// A persisted license record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LicenseRecord {
    pub user_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub status: String,
    pub plan_tier: Option<String>,
    pub billing_cycle: String,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
}

impl LicenseRecord {
    pub fn plan_tier(&self) -> Option<PlanTier> {
        self.plan_tier.as_deref().and_then(PlanTier::parse)
    }
}

/// Service owning license reads and the reconciliation upsert.
#[derive(Clone)]
pub struct LicenseService {
    stripe: StripeClient,
    pool: PgPool,
}

impl LicenseService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Look up the local user owning a Stripe customer id.
    pub async fn find_user_by_customer(&self, stripe_customer_id: &str) -> BillingResult<Uuid> {
        let result: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE stripe_customer_id = $1")
                .bind(stripe_customer_id)
                .fetch_optional(&self.pool)
                .await?;

        result
            .map(|(id,)| id)
            .ok_or_else(|| BillingError::CustomerNotFound(stripe_customer_id.to_string()))
    }

    /// Fetch a user's license record.
    pub async fn get_license(&self, user_id: Uuid) -> BillingResult<Option<LicenseRecord>> {
        let record: Option<LicenseRecord> = sqlx::query_as(
            r#"
            SELECT user_id, stripe_subscription_id, stripe_customer_id, status,
                   plan_tier, billing_cycle, current_period_end,
                   cancel_at_period_end, canceled_at
            FROM licenses
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Reconcile a Stripe subscription into the user's license record.
    ///
    /// `deleted` marks a `customer.subscription.deleted` event, which forces
    /// status `canceled`. An unmapped price id leaves `plan_tier` unchanged
    /// via COALESCE; a known tier is never cleared.
    pub async fn sync_subscription(
        &self,
        user_id: Uuid,
        subscription: &Subscription,
        deleted: bool,
    ) -> BillingResult<()> {
        let status = if deleted {
            LicenseStatus::Canceled
        } else {
            status_for_stripe(subscription.status)
        };

        let plan_tier: Option<PlanTier> = primary_price_id(subscription)
            .and_then(|price_id| self.stripe.config().plan_for_price_id(&price_id))
            .map(|(tier, _)| tier);

        let billing_cycle = cycle_for_interval(primary_interval(subscription));

        let current_period_end =
            OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
                .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let canceled_at = subscription
            .canceled_at
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok());

        sqlx::query(
            r#"
            INSERT INTO licenses (
                id, user_id, stripe_subscription_id, stripe_customer_id, status,
                plan_tier, billing_cycle, current_period_end,
                cancel_at_period_end, canceled_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW()
            )
            ON CONFLICT (user_id) DO UPDATE SET
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                status = EXCLUDED.status,
                plan_tier = COALESCE(EXCLUDED.plan_tier, licenses.plan_tier),
                billing_cycle = EXCLUDED.billing_cycle,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(subscription.id.as_str())
        .bind(customer_id(subscription))
        .bind(status.as_str())
        .bind(plan_tier.map(|t| t.as_str()))
        .bind(billing_cycle.as_str())
        .bind(current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(canceled_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = %status,
            plan_tier = ?plan_tier.map(|t| t.as_str()),
            billing_cycle = %billing_cycle,
            "License record reconciled"
        );

        Ok(())
    }
}
