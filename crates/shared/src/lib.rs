//! Shared types and database helpers for the Renderloft backend.
//!
//! The domain vocabulary lives here so both the API server and the billing
//! crate agree on plan tiers, billing cycles, and license statuses.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{BillingCycle, LicenseStatus, PlanTier};
