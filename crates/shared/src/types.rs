//! Domain vocabulary for license records.
//!
//! These enums are the canonical value sets for the `licenses` table.
//! They are always derived from Stripe state through fixed mapping tables,
//! never computed from local business rules.

use serde::{Deserialize, Serialize};

/// Subscription plan tiers, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Budget,
    CostControl,
    Production,
}

impl PlanTier {
    /// Rank used by the downgrade-only policy. Higher rank = higher tier.
    pub fn rank(&self) -> u8 {
        match self {
            PlanTier::Budget => 1,
            PlanTier::CostControl => 2,
            PlanTier::Production => 3,
        }
    }

    /// Database/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Budget => "budget",
            PlanTier::CostControl => "cost_control",
            PlanTier::Production => "production",
        }
    }

    /// Human-facing name as shown on pricing pages and in API responses.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlanTier::Budget => "Budget",
            PlanTier::CostControl => "Cost Control",
            PlanTier::Production => "Production",
        }
    }

    /// Parse a tier from request input. Accepts both the storage form and the
    /// display name ("Cost Control" and "cost_control" are the same tier).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "budget" => Some(PlanTier::Budget),
            "cost_control" => Some(PlanTier::CostControl),
            "production" => Some(PlanTier::Production),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cycle of a subscription price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
    None,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
            BillingCycle::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Some(BillingCycle::Monthly),
            "yearly" => Some(BillingCycle::Yearly),
            "none" => Some(BillingCycle::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// License status, derived from the Stripe subscription status via the fixed
/// status map in the billing crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Trial,
    PastDue,
    Canceled,
    None,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Trial => "trial",
            LicenseStatus::PastDue => "past_due",
            LicenseStatus::Canceled => "canceled",
            LicenseStatus::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LicenseStatus::Active),
            "trial" => Some(LicenseStatus::Trial),
            "past_due" => Some(LicenseStatus::PastDue),
            "canceled" => Some(LicenseStatus::Canceled),
            "none" => Some(LicenseStatus::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
