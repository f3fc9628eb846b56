//! Renderloft API Server
//!
//! Thin backend for the Renderloft marketing site: Stripe webhook ingest and
//! billing plan-change endpoints, with authentication proxied to the hosted
//! identity provider.

mod auth;
mod config;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::http::{header, Method};
use renderloft_shared::{create_migration_pool, create_pool, run_migrations};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,renderloft_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Renderloft API Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool (pooler URL for regular queries)
    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Run migrations over the direct URL (bypasses PgBouncer, which doesn't
    // support the prepared statements sqlx migrate uses)
    let migration_url = config
        .database_direct_url
        .as_ref()
        .unwrap_or(&config.database_url);
    let migration_pool = create_migration_pool(migration_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;

    // Create application state
    let state = AppState::new(pool, config);

    // Run license invariant checks once at startup; violations are logged,
    // not fatal, so a drifted cache never blocks the site from serving.
    if let Some(billing) = &state.billing {
        let billing = billing.clone();
        tokio::spawn(async move {
            match billing.invariants.run_all_checks().await {
                Ok(summary) if summary.healthy => {
                    tracing::info!(
                        checks_run = summary.checks_run,
                        "License invariant checks passed"
                    );
                }
                Ok(summary) => {
                    for violation in &summary.violations {
                        tracing::warn!(
                            invariant = %violation.invariant,
                            severity = %violation.severity,
                            description = %violation.description,
                            "License invariant violation"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to run license invariant checks");
                }
            }
        });
    }

    // Build CORS layer - restrict to the explicit origin allow-list.
    // Preflight OPTIONS requests are answered here, before any auth.
    let allowed_origins: Vec<axum::http::HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .allow_credentials(true);

    // Parse bind address
    let addr: SocketAddr = state.config.bind_address.parse()?;

    // Build the router
    let app = create_router(state).layer(cors).layer(TraceLayer::new_for_http());
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
