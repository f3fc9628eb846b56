//! Stripe client wrapper and billing configuration.
//!
//! Holds the API secrets and the fixed price table. The price table is the
//! single bidirectional mapping between Stripe price ids and (plan tier,
//! billing cycle) pairs; both the webhook reconciler and the downgrade
//! scheduler resolve through it so the decision logic stays auditable.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use renderloft_shared::{BillingCycle, PlanTier};

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Webhook timestamp tolerance in seconds. Stripe recommends five minutes.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe price ids for each (tier, cycle) pair.
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub budget_monthly: String,
    pub budget_yearly: String,
    pub cost_control_monthly: String,
    pub cost_control_yearly: String,
    pub production_monthly: String,
    pub production_yearly: String,
}

impl PriceIds {
    /// All configured (price id, tier, cycle) rows. Unset prices are omitted.
    fn rows(&self) -> Vec<(&str, PlanTier, BillingCycle)> {
        [
            (
                self.budget_monthly.as_str(),
                PlanTier::Budget,
                BillingCycle::Monthly,
            ),
            (
                self.budget_yearly.as_str(),
                PlanTier::Budget,
                BillingCycle::Yearly,
            ),
            (
                self.cost_control_monthly.as_str(),
                PlanTier::CostControl,
                BillingCycle::Monthly,
            ),
            (
                self.cost_control_yearly.as_str(),
                PlanTier::CostControl,
                BillingCycle::Yearly,
            ),
            (
                self.production_monthly.as_str(),
                PlanTier::Production,
                BillingCycle::Monthly,
            ),
            (
                self.production_yearly.as_str(),
                PlanTier::Production,
                BillingCycle::Yearly,
            ),
        ]
        .into_iter()
        .filter(|(id, _, _)| !id.is_empty())
        .collect()
    }
}

/// Billing configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// `STRIPE_SECRET_KEY` and `STRIPE_WEBHOOK_SECRET` are required; price ids
    /// may be partially configured (an unset price simply cannot be resolved).
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        let price = |var: &str| std::env::var(var).unwrap_or_default();

        Ok(Self {
            secret_key,
            webhook_secret,
            price_ids: PriceIds {
                budget_monthly: price("STRIPE_PRICE_BUDGET_MONTHLY"),
                budget_yearly: price("STRIPE_PRICE_BUDGET_YEARLY"),
                cost_control_monthly: price("STRIPE_PRICE_COST_CONTROL_MONTHLY"),
                cost_control_yearly: price("STRIPE_PRICE_COST_CONTROL_YEARLY"),
                production_monthly: price("STRIPE_PRICE_PRODUCTION_MONTHLY"),
                production_yearly: price("STRIPE_PRICE_PRODUCTION_YEARLY"),
            },
        })
    }

    /// Resolve a (tier, cycle) pair to its configured price id.
    pub fn price_id_for(&self, tier: PlanTier, cycle: BillingCycle) -> Option<&str> {
        self.price_ids
            .rows()
            .into_iter()
            .find(|(_, t, c)| *t == tier && *c == cycle)
            .map(|(id, _, _)| id)
    }

    /// Resolve a Stripe price id to its (tier, cycle) pair.
    ///
    /// Returns `None` for unconfigured prices; the reconciler then leaves
    /// `plan_tier` unchanged rather than clearing a known tier.
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<(PlanTier, BillingCycle)> {
        self.price_ids
            .rows()
            .into_iter()
            .find(|(id, _, _)| *id == price_id)
            .map(|(_, tier, cycle)| (tier, cycle))
    }
}

/// Thin wrapper around the async-stripe client carrying our configuration.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: std::sync::Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: std::sync::Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The underlying async-stripe client.
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Verify a `Stripe-Signature` header against the raw request body.
    ///
    /// Parses the `t=timestamp,v1=signature` header, rejects timestamps
    /// outside the five-minute tolerance, and compares the expected
    /// HMAC-SHA256 of `"{t}.{payload}"` in constant time.
    pub fn verify_signature(&self, payload: &str, signature_header: &str) -> BillingResult<()> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| BillingError::Internal(format!("System time error: {}", e)))?
            .as_secs() as i64;

        verify_signature_at(payload, signature_header, &self.config.webhook_secret, now)
    }
}

/// Signature verification with an explicit clock, so the tolerance window is
/// testable.
pub(crate) fn verify_signature_at(
    payload: &str,
    signature_header: &str,
    webhook_secret: &str,
    now: i64,
) -> BillingResult<()> {
    // Header format: t=timestamp,v1=signature[,v0=signature]
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1]),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in Stripe-Signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Missing v1 signature in Stripe-Signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance window"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The "whsec_" prefix is not part of the signing key.
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if bool::from(computed.as_bytes().ct_eq(v1_signature.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!("Webhook signature mismatch");
        Err(BillingError::WebhookSignatureInvalid)
    }
}
