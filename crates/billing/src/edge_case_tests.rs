// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Tests critical boundary conditions in:
//! - Webhook signature verification (SIG)
//! - Fixed mapping tables (MAP)
//! - Downgrade-only policy (DG)
//! - Schedule phase construction (PH)
//! - Rate limiting (RL)

#[cfg(test)]
mod signature_tests {
    use crate::client::verify_signature_at;
    use crate::error::BillingError;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn header(payload: &str, secret: &str, timestamp: i64) -> String {
        format!("t={},v1={}", timestamp, sign(payload, secret, timestamp))
    }

    // =========================================================================
    // SIG-01: Valid signature within tolerance - accepted
    // =========================================================================
    #[test]
    fn test_valid_signature_accepted() {
        let payload = r#"{"type":"customer.subscription.updated"}"#;
        let sig = header(payload, SECRET, NOW);

        assert!(verify_signature_at(payload, &sig, SECRET, NOW).is_ok());
    }

    // =========================================================================
    // SIG-02: Signature computed with wrong secret - rejected
    // =========================================================================
    #[test]
    fn test_wrong_secret_rejected() {
        let payload = r#"{"type":"customer.subscription.updated"}"#;
        let sig = header(payload, "whsec_other_secret", NOW);

        let err = verify_signature_at(payload, &sig, SECRET, NOW).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    // =========================================================================
    // SIG-03: Payload modified after signing - rejected
    // =========================================================================
    #[test]
    fn test_tampered_payload_rejected() {
        let payload = r#"{"type":"customer.subscription.updated"}"#;
        let sig = header(payload, SECRET, NOW);
        let tampered = r#"{"type":"customer.subscription.deleted"}"#;

        let err = verify_signature_at(tampered, &sig, SECRET, NOW).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    // =========================================================================
    // SIG-04: Timestamp older than 5 minutes - rejected even if HMAC is valid
    // =========================================================================
    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = r#"{"type":"customer.subscription.updated"}"#;
        let stale = NOW - 600;
        let sig = header(payload, SECRET, stale);

        let err = verify_signature_at(payload, &sig, SECRET, NOW).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    // =========================================================================
    // SIG-05: Timestamp at exactly the tolerance edge - accepted
    // =========================================================================
    #[test]
    fn test_timestamp_at_tolerance_edge_accepted() {
        let payload = r#"{"id":"evt_1"}"#;
        let edge = NOW - 300;
        let sig = header(payload, SECRET, edge);

        assert!(verify_signature_at(payload, &sig, SECRET, NOW).is_ok());
    }

    // =========================================================================
    // SIG-06: Malformed header (missing t= or v1=) - rejected
    // =========================================================================
    #[test]
    fn test_malformed_header_rejected() {
        let payload = r#"{"id":"evt_1"}"#;

        for bad in ["", "t=123", "v1=abcdef", "garbage", "t=notanumber,v1=abc"] {
            let err = verify_signature_at(payload, bad, SECRET, NOW).unwrap_err();
            assert!(
                matches!(err, BillingError::WebhookSignatureInvalid),
                "header {:?} should be rejected",
                bad
            );
        }
    }
}

#[cfg(test)]
mod mapping_tests {
    use crate::client::{PriceIds, StripeConfig};
    use crate::license::{cycle_for_interval, status_for_stripe};
    use renderloft_shared::{BillingCycle, LicenseStatus, PlanTier};
    use stripe::{RecurringInterval, SubscriptionStatus};

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds {
                budget_monthly: "price_budget_m".to_string(),
                budget_yearly: "price_budget_y".to_string(),
                cost_control_monthly: "price_cc_m".to_string(),
                cost_control_yearly: "price_cc_y".to_string(),
                production_monthly: "price_prod_m".to_string(),
                production_yearly: "price_prod_y".to_string(),
            },
        }
    }

    // =========================================================================
    // MAP-01: Status map covers the full Stripe status domain
    // =========================================================================
    #[test]
    fn test_status_map_table() {
        assert_eq!(
            status_for_stripe(SubscriptionStatus::Active),
            LicenseStatus::Active
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::Trialing),
            LicenseStatus::Trial
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::PastDue),
            LicenseStatus::PastDue
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::Canceled),
            LicenseStatus::Canceled
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::Unpaid),
            LicenseStatus::Canceled
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::IncompleteExpired),
            LicenseStatus::Canceled
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::Incomplete),
            LicenseStatus::None
        );
        assert_eq!(
            status_for_stripe(SubscriptionStatus::Paused),
            LicenseStatus::None
        );
    }

    // =========================================================================
    // MAP-02: Recurring interval maps to billing cycle, else none
    // =========================================================================
    #[test]
    fn test_cycle_map() {
        assert_eq!(
            cycle_for_interval(Some(RecurringInterval::Month)),
            BillingCycle::Monthly
        );
        assert_eq!(
            cycle_for_interval(Some(RecurringInterval::Year)),
            BillingCycle::Yearly
        );
        assert_eq!(
            cycle_for_interval(Some(RecurringInterval::Week)),
            BillingCycle::None
        );
        assert_eq!(cycle_for_interval(None), BillingCycle::None);
    }

    // =========================================================================
    // MAP-03: Price map resolves both directions for every configured pair
    // =========================================================================
    #[test]
    fn test_price_map_bidirectional() {
        let config = test_config();

        for (tier, cycle, price) in [
            (PlanTier::Budget, BillingCycle::Monthly, "price_budget_m"),
            (PlanTier::Budget, BillingCycle::Yearly, "price_budget_y"),
            (PlanTier::CostControl, BillingCycle::Monthly, "price_cc_m"),
            (PlanTier::CostControl, BillingCycle::Yearly, "price_cc_y"),
            (PlanTier::Production, BillingCycle::Monthly, "price_prod_m"),
            (PlanTier::Production, BillingCycle::Yearly, "price_prod_y"),
        ] {
            assert_eq!(config.price_id_for(tier, cycle), Some(price));
            assert_eq!(config.plan_for_price_id(price), Some((tier, cycle)));
        }
    }

    // =========================================================================
    // MAP-04: Unknown price id resolves to None (tier left unchanged upstream)
    // =========================================================================
    #[test]
    fn test_unknown_price_resolves_to_none() {
        let config = test_config();
        assert_eq!(config.plan_for_price_id("price_unknown"), None);
    }

    // =========================================================================
    // MAP-05: Unconfigured price slots are never resolvable in either direction
    // =========================================================================
    #[test]
    fn test_empty_price_slot_not_resolvable() {
        let mut config = test_config();
        config.price_ids.production_yearly = String::new();

        assert_eq!(
            config.price_id_for(PlanTier::Production, BillingCycle::Yearly),
            None
        );
        // An empty lookup string must not match the empty slot.
        assert_eq!(config.plan_for_price_id(""), None);
    }
}

#[cfg(test)]
mod downgrade_policy_tests {
    use crate::error::BillingError;
    use crate::subscriptions::check_downgrade_direction;
    use renderloft_shared::{BillingCycle, PlanTier};

    // =========================================================================
    // DG-01: Strictly lower rank - permitted
    // =========================================================================
    #[test]
    fn test_lower_rank_permitted() {
        assert!(check_downgrade_direction(
            (PlanTier::Production, BillingCycle::Monthly),
            (PlanTier::Budget, BillingCycle::Monthly),
        )
        .is_ok());

        assert!(check_downgrade_direction(
            (PlanTier::CostControl, BillingCycle::Yearly),
            (PlanTier::Budget, BillingCycle::Yearly),
        )
        .is_ok());
    }

    // =========================================================================
    // DG-02: Production/yearly to Budget/monthly - permitted (cross cycle)
    // =========================================================================
    #[test]
    fn test_production_yearly_to_budget_monthly_permitted() {
        assert!(check_downgrade_direction(
            (PlanTier::Production, BillingCycle::Yearly),
            (PlanTier::Budget, BillingCycle::Monthly),
        )
        .is_ok());
    }

    // =========================================================================
    // DG-03: Same plan, yearly to monthly - permitted
    // =========================================================================
    #[test]
    fn test_same_plan_yearly_to_monthly_permitted() {
        assert!(check_downgrade_direction(
            (PlanTier::CostControl, BillingCycle::Yearly),
            (PlanTier::CostControl, BillingCycle::Monthly),
        )
        .is_ok());
    }

    // =========================================================================
    // DG-04: Same plan, monthly to yearly - rejected (that is an upgrade)
    // =========================================================================
    #[test]
    fn test_same_plan_monthly_to_yearly_rejected() {
        let err = check_downgrade_direction(
            (PlanTier::CostControl, BillingCycle::Monthly),
            (PlanTier::CostControl, BillingCycle::Yearly),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::NotADowngrade { .. }));
    }

    // =========================================================================
    // DG-05: Higher rank target - rejected with upgrade-flow message
    // =========================================================================
    #[test]
    fn test_higher_rank_rejected() {
        let err = check_downgrade_direction(
            (PlanTier::Budget, BillingCycle::Monthly),
            (PlanTier::Production, BillingCycle::Monthly),
        )
        .unwrap_err();

        assert!(matches!(err, BillingError::NotADowngrade { .. }));
        assert!(err.to_string().contains("use the upgrade flow instead"));
    }

    // =========================================================================
    // DG-06: Exact current plan and cycle - rejected as already-on-plan
    // =========================================================================
    #[test]
    fn test_same_plan_same_cycle_rejected() {
        let err = check_downgrade_direction(
            (PlanTier::Budget, BillingCycle::Monthly),
            (PlanTier::Budget, BillingCycle::Monthly),
        )
        .unwrap_err();

        assert!(matches!(err, BillingError::AlreadyOnPlan));
        assert_eq!(err.to_string(), "Already on target plan");
    }

    // =========================================================================
    // DG-07: Equal rank is not a downgrade even across cycles the wrong way
    // =========================================================================
    #[test]
    fn test_equal_rank_monthly_to_monthly_never_reachable() {
        // Same tier + same cycle is AlreadyOnPlan; same tier + different cycle
        // is only permitted yearly->monthly. The policy has no lateral path.
        let err = check_downgrade_direction(
            (PlanTier::Production, BillingCycle::Monthly),
            (PlanTier::Production, BillingCycle::Yearly),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::NotADowngrade { .. }));
    }
}

#[cfg(test)]
mod phase_tests {
    use crate::subscriptions::build_downgrade_phases;

    const PERIOD_START: i64 = 1_700_000_000;
    const PERIOD_END: i64 = 1_702_592_000;

    // =========================================================================
    // PH-01: Exactly two phases, boundary at current period end
    // =========================================================================
    #[test]
    fn test_two_phases_with_boundary_at_period_end() {
        let items = vec![("price_prod_y".to_string(), Some(1))];
        let params = build_downgrade_phases(&items, PERIOD_START, PERIOD_END, "price_budget_m");

        assert_eq!(params.phases.len(), 2);
        assert_eq!(params.phases[0].start_date, Some(PERIOD_START));
        assert_eq!(params.phases[0].end_date, Some(PERIOD_END));
        // Phase two starts where phase one ends; no explicit dates.
        assert_eq!(params.phases[1].start_date, None);
        assert_eq!(params.phases[1].end_date, None);
    }

    // =========================================================================
    // PH-02: Phase one preserves all current items and quantities
    // =========================================================================
    #[test]
    fn test_phase_one_preserves_current_items() {
        let items = vec![
            ("price_prod_y".to_string(), Some(1)),
            ("price_seat_addon".to_string(), Some(4)),
        ];
        let params = build_downgrade_phases(&items, PERIOD_START, PERIOD_END, "price_budget_m");

        assert_eq!(params.phases[0].items.len(), 2);
        assert_eq!(params.phases[0].items[0].price, "price_prod_y");
        assert_eq!(params.phases[0].items[0].quantity, Some(1));
        assert_eq!(params.phases[0].items[1].price, "price_seat_addon");
        assert_eq!(params.phases[0].items[1].quantity, Some(4));
    }

    // =========================================================================
    // PH-03: Phase two carries only the target price
    // =========================================================================
    #[test]
    fn test_phase_two_is_target_price_only() {
        let items = vec![
            ("price_prod_y".to_string(), Some(1)),
            ("price_seat_addon".to_string(), Some(4)),
        ];
        let params = build_downgrade_phases(&items, PERIOD_START, PERIOD_END, "price_budget_m");

        assert_eq!(params.phases[1].items.len(), 1);
        assert_eq!(params.phases[1].items[0].price, "price_budget_m");
        assert_eq!(params.phases[1].items[0].quantity, Some(1));
    }

    // =========================================================================
    // PH-04: No proration in either phase, schedule released afterwards
    // =========================================================================
    #[test]
    fn test_no_proration_and_release() {
        let items = vec![("price_cc_m".to_string(), None)];
        let params = build_downgrade_phases(&items, PERIOD_START, PERIOD_END, "price_budget_m");

        assert_eq!(params.phases[0].proration_behavior, "none");
        assert_eq!(params.phases[1].proration_behavior, "none");
        assert_eq!(params.end_behavior, "release");
    }

    // =========================================================================
    // PH-05: Wire form uses price-based items (serialization shape)
    // =========================================================================
    #[test]
    fn test_phase_params_serialize_with_price() {
        let items = vec![("price_cc_m".to_string(), Some(1))];
        let params = build_downgrade_phases(&items, PERIOD_START, PERIOD_END, "price_budget_m");

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["phases"][0]["items"][0]["price"], "price_cc_m");
        assert_eq!(json["phases"][1]["items"][0]["price"], "price_budget_m");
        assert_eq!(json["end_behavior"], "release");
        // Quantity is omitted when unknown rather than serialized as null.
        let no_qty = build_downgrade_phases(
            &[("price_cc_m".to_string(), None)],
            PERIOD_START,
            PERIOD_END,
            "price_budget_m",
        );
        let json = serde_json::to_value(&no_qty).unwrap();
        assert!(json["phases"][0]["items"][0].get("quantity").is_none());
    }
}

#[cfg(test)]
mod rate_limit_tests {
    use crate::rate_limit::RateLimiter;
    use uuid::Uuid;

    // =========================================================================
    // RL-01: First request creates a window and is allowed
    // =========================================================================
    #[tokio::test]
    async fn test_first_request_allowed() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        let result = limiter.check_user(user_id).await.unwrap();
        assert!(result.allowed, "First request should be allowed");
        assert_eq!(result.remaining_minute, 29, "Should have 29 remaining");
    }

    // =========================================================================
    // RL-02: Request past the limit is rejected with retry_after
    // =========================================================================
    #[tokio::test]
    async fn test_exactly_at_limit_rejected() {
        let limiter = RateLimiter::new_in_memory();

        for i in 0..5 {
            let result = limiter.check("test-key", 5).await.unwrap();
            assert!(result.allowed, "Request {} should be allowed", i);
        }

        let result = limiter.check("test-key", 5).await.unwrap();
        assert!(!result.allowed, "6th request should be rejected");
        assert!(
            result.retry_after_seconds.is_some(),
            "Should have retry_after"
        );
    }

    // =========================================================================
    // RL-03: Different keys are isolated
    // =========================================================================
    #[tokio::test]
    async fn test_different_keys_isolated() {
        let limiter = RateLimiter::new_in_memory();

        for _ in 0..5 {
            limiter.check("key-1", 5).await.unwrap();
        }

        let result1 = limiter.check("key-1", 5).await.unwrap();
        assert!(!result1.allowed, "Key 1 should be blocked");

        let result2 = limiter.check("key-2", 5).await.unwrap();
        assert!(result2.allowed, "Key 2 should be allowed");
    }

    // =========================================================================
    // RL-04: Auth-by-IP limit blocks brute force after 10 attempts
    // =========================================================================
    #[tokio::test]
    async fn test_auth_rate_limit_by_ip() {
        let limiter = RateLimiter::new_in_memory();
        let ip = "192.168.1.1";

        for _ in 0..10 {
            let result = limiter.check_auth_by_ip(ip).await.unwrap();
            assert!(result.allowed);
        }

        let result = limiter.check_auth_by_ip(ip).await.unwrap();
        assert!(!result.allowed, "11th auth attempt should be blocked");
    }

    // =========================================================================
    // RL-05: Cleanup during active window does not corrupt counts
    // =========================================================================
    #[tokio::test]
    async fn test_cleanup_doesnt_corrupt_state() {
        let limiter = RateLimiter::new_in_memory();

        for _ in 0..5 {
            limiter.check("cleanup-key", 10).await.unwrap();
        }

        limiter.cleanup().await;

        let result = limiter.check("cleanup-key", 10).await.unwrap();
        assert!(result.allowed, "Should still work after cleanup");
    }
}
