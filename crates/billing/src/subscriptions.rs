//! Subscription management and downgrade scheduling.
//!
//! Downgrades never take effect mid-cycle. The scheduler validates the
//! requested change against the plan-rank table, then anchors a two-phase
//! subscription schedule to the live subscription: the current items run out
//! the paid period, the target price starts exactly at the period boundary,
//! and neither phase prorates. Stripe remains the source of truth; the only
//! local writes on this path are audit entries.

use sqlx::PgPool;
use stripe::{Subscription, SubscriptionId};
use time::OffsetDateTime;
use uuid::Uuid;

use renderloft_shared::{BillingCycle, PlanTier};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, AuditAction, AuditEntryBuilder, AuditLogger};

/// Schedule phase item carrying a `price` reference.
/// The async-stripe 0.39 generated schedule params model phase items through
/// `plan`, but Stripe's modern API expects `price`; these structs express the
/// request the API actually accepts and are posted through the raw client.
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct SchedulePhaseItemParams {
    pub price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
}

/// One phase of a subscription schedule.
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct SchedulePhaseParams {
    pub items: Vec<SchedulePhaseItemParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    pub proration_behavior: &'static str,
}

/// Parameters for updating a schedule's phase list.
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct UpdateScheduleParams {
    pub phases: Vec<SchedulePhaseParams>,
    pub end_behavior: &'static str,
}

/// Parameters for attaching a schedule to an existing subscription.
#[derive(Clone, Debug, serde::Serialize)]
struct CreateScheduleParams {
    from_subscription: String,
}

/// A scheduled downgrade, as returned to the caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduledDowngrade {
    pub current_plan: PlanTier,
    pub current_cycle: BillingCycle,
    pub target_plan: PlanTier,
    pub target_cycle: BillingCycle,
    pub effective_at: OffsetDateTime,
}

/// Downgrade-only policy over the fixed plan-rank table.
///
/// Permitted: a strictly lower target rank, or the same plan moving from
/// yearly to monthly billing. Everything else is rejected; upgrades and
/// lateral moves belong to the checkout flow, which handles proration.
pub fn check_downgrade_direction(
    current: (PlanTier, BillingCycle),
    target: (PlanTier, BillingCycle),
) -> BillingResult<()> {
    let (current_plan, current_cycle) = current;
    let (target_plan, target_cycle) = target;

    if current_plan == target_plan && current_cycle == target_cycle {
        return Err(BillingError::AlreadyOnPlan);
    }

    if target_plan.rank() < current_plan.rank() {
        return Ok(());
    }

    if target_plan == current_plan
        && current_cycle == BillingCycle::Yearly
        && target_cycle == BillingCycle::Monthly
    {
        return Ok(());
    }

    Err(BillingError::NotADowngrade {
        from: current_plan,
        to: target_plan,
    })
}

/// Build the two-phase downgrade schedule.
///
/// Phase one pins the current items from `period_start` to `period_end`.
/// Phase two starts implicitly where phase one ends and carries only the
/// target price. Neither phase prorates, so the customer is never charged or
/// refunded mid-cycle; `end_behavior=release` hands the subscription back to
/// normal billing once the target phase begins.
pub(crate) fn build_downgrade_phases(
    current_items: &[(String, Option<u64>)],
    period_start: i64,
    period_end: i64,
    target_price: &str,
) -> UpdateScheduleParams {
    UpdateScheduleParams {
        phases: vec![
            SchedulePhaseParams {
                items: current_items
                    .iter()
                    .map(|(price, quantity)| SchedulePhaseItemParams {
                        price: price.clone(),
                        quantity: *quantity,
                    })
                    .collect(),
                start_date: Some(period_start),
                end_date: Some(period_end),
                proration_behavior: "none",
            },
            SchedulePhaseParams {
                items: vec![SchedulePhaseItemParams {
                    price: target_price.to_string(),
                    quantity: Some(1),
                }],
                start_date: None,
                end_date: None,
                proration_behavior: "none",
            },
        ],
        end_behavior: "release",
    }
}

/// Subscription service for downgrade scheduling.
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
    audit: AuditLogger,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let audit = AuditLogger::new(pool.clone());
        Self {
            stripe,
            pool,
            audit,
        }
    }

    /// Schedule a downgrade to `(target_plan, target_cycle)` for `user_id`,
    /// effective at the end of the current billing period.
    pub async fn schedule_downgrade(
        &self,
        user_id: Uuid,
        target_plan: PlanTier,
        target_cycle: BillingCycle,
    ) -> BillingResult<ScheduledDowngrade> {
        // The cached license only tells us which subscription to look at;
        // prices and period boundaries come from the live fetch below.
        let sub_id = self.get_subscription_id(user_id).await?;
        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let current_price_id = crate::license::primary_price_id(&subscription).ok_or_else(|| {
            BillingError::Internal("Subscription has no items".to_string())
        })?;

        let current = self
            .stripe
            .config()
            .plan_for_price_id(&current_price_id)
            .ok_or_else(|| {
                tracing::error!(
                    user_id = %user_id,
                    subscription_id = %subscription.id,
                    price_id = %current_price_id,
                    "Cannot determine current plan for downgrade scheduling"
                );
                BillingError::InvalidPlan(
                    "Cannot determine current subscription plan. Please contact support."
                        .to_string(),
                )
            })?;

        let target_price_id = self
            .stripe
            .config()
            .price_id_for(target_plan, target_cycle)
            .ok_or_else(|| BillingError::PriceNotConfigured {
                tier: target_plan.display_name().to_string(),
                cycle: target_cycle.to_string(),
            })?
            .to_string();

        check_downgrade_direction(current, (target_plan, target_cycle))?;

        let period_start = subscription.current_period_start;
        let period_end = subscription.current_period_end;
        let effective_at = OffsetDateTime::from_unix_timestamp(period_end)
            .map_err(|e| BillingError::Internal(format!("Invalid period end: {}", e)))?;

        let current_items: Vec<(String, Option<u64>)> = subscription
            .items
            .data
            .iter()
            .filter_map(|item| {
                item.price
                    .as_ref()
                    .map(|p| (p.id.to_string(), item.quantity))
            })
            .collect();

        let schedule_id = self.get_or_create_schedule(&subscription).await?;

        let params = build_downgrade_phases(
            &current_items,
            period_start,
            period_end,
            &target_price_id,
        );

        // The single mutating step: everything before this point is
        // read-only, so a rejected request leaves no partial state.
        let _schedule: stripe::SubscriptionSchedule = self
            .stripe
            .inner()
            .post_form(
                &format!("/subscription_schedules/{}", schedule_id),
                &params,
            )
            .await?;

        if let Err(e) = self
            .audit
            .log(
                AuditEntryBuilder::new(AuditAction::DowngradeScheduled)
                    .actor(user_id, ActorType::User)
                    .target(subscription.id.to_string())
                    .details(serde_json::json!({
                        "from_plan": current.0.as_str(),
                        "from_cycle": current.1.as_str(),
                        "to_plan": target_plan.as_str(),
                        "to_cycle": target_cycle.as_str(),
                        "effective_at": effective_at.to_string(),
                        "schedule_id": schedule_id,
                    })),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log downgrade audit entry");
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            from_plan = %current.0,
            to_plan = %target_plan,
            to_cycle = %target_cycle,
            effective_at = %effective_at,
            "Scheduled subscription downgrade for period end"
        );

        Ok(ScheduledDowngrade {
            current_plan: current.0,
            current_cycle: current.1,
            target_plan,
            target_cycle,
            effective_at,
        })
    }

    /// Reuse the subscription's existing schedule or attach a new one.
    ///
    /// Creating a schedule `from_subscription` only mirrors the current
    /// phase; billing behavior does not change until the phase update lands.
    async fn get_or_create_schedule(&self, subscription: &Subscription) -> BillingResult<String> {
        if let Some(schedule) = &subscription.schedule {
            let id = match schedule {
                stripe::Expandable::Id(id) => id.to_string(),
                stripe::Expandable::Object(s) => s.id.to_string(),
            };
            tracing::debug!(schedule_id = %id, "Reusing existing subscription schedule");
            return Ok(id);
        }

        let params = CreateScheduleParams {
            from_subscription: subscription.id.to_string(),
        };
        let schedule: stripe::SubscriptionSchedule = self
            .stripe
            .inner()
            .post_form("/subscription_schedules", &params)
            .await?;

        Ok(schedule.id.to_string())
    }

    /// Stripe subscription id from the user's license record.
    async fn get_subscription_id(&self, user_id: Uuid) -> BillingResult<SubscriptionId> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT stripe_subscription_id FROM licenses WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let sub_id = row
            .and_then(|(id,)| id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        sub_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
    }
}
