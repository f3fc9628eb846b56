//! License cache invariants.
//!
//! Runnable consistency checks over the license cache and the webhook event
//! log. Checks only read, never write, and each violation carries enough
//! context to debug the affected rows.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated.
    pub invariant: String,
    /// Users affected.
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation.
    pub description: String,
    /// Additional context for debugging.
    pub context: serde_json::Value,
    /// Severity level.
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - entitlements may be wrong.
    Critical,
    /// High - data inconsistency that needs attention.
    High,
    /// Medium - potential issue, should investigate.
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveWithoutStripeRow {
    user_id: Uuid,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CanceledWithoutPeriodEndRow {
    user_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct StuckEventRow {
    stripe_event_id: String,
    event_type: String,
    received_at: OffsetDateTime,
}

/// Service for running license invariant checks.
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary.
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_active_license_has_stripe_ids().await?);
        violations.extend(self.check_canceled_has_period_end().await?);
        violations.extend(self.check_no_stuck_webhook_events().await?);

        let checks_run = 3;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: active/trial licenses reference Stripe identifiers.
    ///
    /// A license cannot be a cache of processor state if it no longer says
    /// which subscription it mirrors.
    async fn check_active_license_has_stripe_ids(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ActiveWithoutStripeRow> = sqlx::query_as(
            r#"
            SELECT user_id, status
            FROM licenses
            WHERE status IN ('active', 'trial', 'past_due')
              AND (stripe_subscription_id IS NULL OR stripe_customer_id IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_license_has_stripe_ids".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "License with status '{}' is missing Stripe identifiers",
                    row.status
                ),
                context: serde_json::json!({ "status": row.status }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: canceled licenses have a period end.
    ///
    /// Cancellation is represented as a status transition, and the period end
    /// is when access actually stops.
    async fn check_canceled_has_period_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CanceledWithoutPeriodEndRow> = sqlx::query_as(
            r#"
            SELECT user_id
            FROM licenses
            WHERE status = 'canceled'
              AND current_period_end IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "canceled_has_period_end".to_string(),
                user_ids: vec![row.user_id],
                description: "Canceled license has no period end date".to_string(),
                context: serde_json::json!({}),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: no webhook events stuck without an outcome.
    ///
    /// Every event older than an hour should carry either `processed_at` or
    /// `processing_error`; a row with neither means the handler died between
    /// the claim insert and the outcome update.
    async fn check_no_stuck_webhook_events(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StuckEventRow> = sqlx::query_as(
            r#"
            SELECT stripe_event_id, event_type, received_at
            FROM stripe_webhook_events
            WHERE processed_at IS NULL
              AND processing_error IS NULL
              AND received_at < NOW() - INTERVAL '1 hour'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stuck_webhook_events".to_string(),
                user_ids: vec![],
                description: format!(
                    "Webhook event '{}' ({}) has no processing outcome",
                    row.stripe_event_id, row.event_type
                ),
                context: serde_json::json!({
                    "stripe_event_id": row.stripe_event_id,
                    "event_type": row.event_type,
                    "received_at": row.received_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name.
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "active_license_has_stripe_ids" => self.check_active_license_has_stripe_ids().await,
            "canceled_has_period_end" => self.check_canceled_has_period_end().await,
            "no_stuck_webhook_events" => self.check_no_stuck_webhook_events().await,
            _ => Ok(vec![]),
        }
    }

    /// List of all available invariant checks.
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "active_license_has_stripe_ids",
            "canceled_has_period_end",
            "no_stuck_webhook_events",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 3);
        assert!(checks.contains(&"active_license_has_stripe_ids"));
        assert!(checks.contains(&"no_stuck_webhook_events"));
    }
}
