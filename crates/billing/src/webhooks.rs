//! Stripe webhook handling.
//!
//! Verifies event signatures, deduplicates deliveries through the event log's
//! unique constraint, and reconciles subscription lifecycle events into
//! license records. Stripe delivers at least once; the event-log insert is
//! the idempotency gate.

use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Subscription, Webhook};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, AuditAction, AuditEntryBuilder, AuditLogger};
use crate::license::LicenseService;

/// Outcome of handling a verified event. Both variants answer HTTP 200; the
/// distinction only matters for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event was inserted and processed (or its processing error recorded).
    Processed,
    /// Event id was already in the log; nothing was reprocessed.
    Duplicate,
}

/// Webhook handler for Stripe events.
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    licenses: LicenseService,
    audit: AuditLogger,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let licenses = LicenseService::new(stripe.clone(), pool.clone());
        let audit = AuditLogger::new(pool.clone());
        Self {
            stripe,
            pool,
            licenses,
            audit,
        }
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Tries the library's verifier first, then falls back to manual
    /// signature verification; async-stripe's `construct_event` rejects
    /// payloads from newer Stripe API versions that still carry a valid
    /// signature.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::debug!(
                    stripe_error = %e,
                    "Library webhook parsing failed, trying manual verification"
                );
            }
        }

        self.stripe.verify_signature(payload, signature)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse verified webhook payload");
            BillingError::WebhookEventNotSupported(e.to_string())
        })?;

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// The insert into `stripe_webhook_events` claims the event: a duplicate
    /// event id hits the unique constraint and is answered as a no-op.
    /// Processing failures after the claim are recorded on the event row and
    /// do not propagate, so Stripe never retries an event this system cannot
    /// self-heal (an unknown customer id stays unknown on redelivery).
    pub async fn handle_event(
        &self,
        event: Event,
        raw_payload: &str,
    ) -> BillingResult<WebhookOutcome> {
        let event_id = event.id.to_string();
        let event_type = event.type_.to_string();

        let payload: serde_json::Value = serde_json::from_str(raw_payload)
            .unwrap_or_else(|_| serde_json::json!({ "raw": raw_payload }));

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events (stripe_event_id, event_type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (stripe_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type)
        .bind(&payload)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Duplicate webhook event, skipping"
            );
            if let Err(e) = self
                .audit
                .log(
                    AuditEntryBuilder::new(AuditAction::WebhookReplayed)
                        .actor_type(ActorType::Stripe)
                        .target(&event_id),
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to log webhook replay audit entry");
            }
            return Ok(WebhookOutcome::Duplicate);
        }

        tracing::info!(
            event_id = %event_id,
            event_type = %event_type,
            "Processing Stripe webhook event"
        );

        let result = self.process_event(&event).await;

        match &result {
            Ok(()) => {
                sqlx::query(
                    "UPDATE stripe_webhook_events SET processed_at = NOW() WHERE stripe_event_id = $1",
                )
                .bind(&event_id)
                .execute(&self.pool)
                .await?;
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event_id,
                    event_type = %event_type,
                    error = %e,
                    "Webhook event processing failed, recording error"
                );
                sqlx::query(
                    "UPDATE stripe_webhook_events SET processing_error = $1 WHERE stripe_event_id = $2",
                )
                .bind(e.to_string())
                .bind(&event_id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn process_event(&self, event: &Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CustomerSubscriptionCreated | EventType::CustomerSubscriptionUpdated => {
                let subscription = extract_subscription(event)?;
                self.reconcile_subscription(event, &subscription, false)
                    .await
            }
            EventType::CustomerSubscriptionDeleted => {
                let subscription = extract_subscription(event)?;
                self.reconcile_subscription(event, &subscription, true).await
            }
            _ => {
                // Track which events arrive without a handler configured.
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type"
                );
                Ok(())
            }
        }
    }

    async fn reconcile_subscription(
        &self,
        event: &Event,
        subscription: &Subscription,
        deleted: bool,
    ) -> BillingResult<()> {
        let customer_id = crate::license::customer_id(subscription);
        let user_id = self.licenses.find_user_by_customer(&customer_id).await?;

        self.licenses
            .sync_subscription(user_id, subscription, deleted)
            .await?;

        let action = if deleted {
            AuditAction::SubscriptionCanceled
        } else {
            AuditAction::LicenseSynced
        };

        if let Err(e) = self
            .audit
            .log(
                AuditEntryBuilder::new(action)
                    .actor(user_id, ActorType::Stripe)
                    .target(subscription.id.to_string())
                    .details(serde_json::json!({
                        "event_id": event.id.to_string(),
                        "event_type": event.type_.to_string(),
                        "cancel_at_period_end": subscription.cancel_at_period_end,
                    })),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription audit entry");
        }

        Ok(())
    }
}

fn extract_subscription(event: &Event) -> BillingResult<Subscription> {
    match &event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription.clone()),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Subscription".to_string(),
        )),
    }
}
