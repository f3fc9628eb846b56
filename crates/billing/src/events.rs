//! Audit event logging.
//!
//! Append-only records of billing state changes: who did what to which
//! target. Rows are never updated or deleted by this crate. Logging failures
//! are reported to the caller, which treats them as non-fatal.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    LicenseSynced,
    SubscriptionCanceled,
    DowngradeScheduled,
    WebhookReplayed,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::LicenseSynced => "LICENSE_SYNCED",
            AuditAction::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            AuditAction::DowngradeScheduled => "DOWNGRADE_SCHEDULED",
            AuditAction::WebhookReplayed => "WEBHOOK_REPLAYED",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// End user through the site.
    User,
    /// System automation.
    System,
    /// Stripe webhook.
    Stripe,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::System => write!(f, "system"),
            ActorType::Stripe => write!(f, "stripe"),
        }
    }
}

/// Builder for audit entries.
pub struct AuditEntryBuilder {
    action: AuditAction,
    actor_id: Option<Uuid>,
    actor_type: ActorType,
    target: Option<String>,
    details: serde_json::Value,
}

impl AuditEntryBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            actor_id: None,
            actor_type: ActorType::System,
            target: None,
            details: serde_json::json!({}),
        }
    }

    /// Set the actor who triggered the action.
    pub fn actor(mut self, actor_id: Uuid, actor_type: ActorType) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_type = actor_type;
        self
    }

    /// Set the actor type without a specific user (system/stripe actions).
    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }

    /// Set the target of the action (a user id, subscription id, event id).
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attach free-form details.
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Writes audit entries.
#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, entry: AuditEntryBuilder) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, actor_type, action, target, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.actor_id)
        .bind(entry.actor_type.to_string())
        .bind(entry.action.to_string())
        .bind(&entry.target)
        .bind(&entry.details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::LicenseSynced.to_string(), "LICENSE_SYNCED");
        assert_eq!(
            AuditAction::DowngradeScheduled.to_string(),
            "DOWNGRADE_SCHEDULED"
        );
    }

    #[test]
    fn actor_types_match_schema_check() {
        // Must stay in sync with the audit_log.actor_type CHECK constraint.
        assert_eq!(ActorType::User.to_string(), "user");
        assert_eq!(ActorType::System.to_string(), "system");
        assert_eq!(ActorType::Stripe.to_string(), "stripe");
    }
}
