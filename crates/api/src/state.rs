//! Application state

use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

use renderloft_billing::BillingService;

use crate::auth::IdentityVerifier;
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Billing service; None when Stripe env vars are absent. Handlers that
    /// need it answer 500 in that case.
    pub billing: Option<Arc<BillingService>>,
    pub verifier: IdentityVerifier,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = match BillingService::from_env(pool.clone()) {
            Ok(svc) => {
                tracing::info!("Stripe billing service initialized");
                Some(Arc::new(svc))
            }
            Err(e) => {
                tracing::warn!("Stripe billing not configured: {}", e);
                None
            }
        };

        // Drop stale rate-limit windows every 5 minutes.
        if let Some(billing) = &billing {
            let billing_for_cleanup = billing.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
                loop {
                    interval.tick().await;
                    billing_for_cleanup.rate_limiter.cleanup().await;
                }
            });
        }

        if config.identity_anon_key.is_empty() {
            tracing::warn!("IDENTITY_ANON_KEY is empty - bearer token verification will fail");
        } else {
            tracing::info!("Identity verification enabled via {}", config.identity_url);
        }

        // HTTP client for identity provider verification
        let verifier = IdentityVerifier::new(
            Client::new(),
            config.identity_url.clone(),
            config.identity_anon_key.clone(),
        );

        Self {
            pool,
            config,
            billing,
            verifier,
        }
    }
}
