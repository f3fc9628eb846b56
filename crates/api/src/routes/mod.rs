//! HTTP routes.

pub mod billing;
pub mod webhooks;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/billing/downgrade", post(billing::schedule_downgrade))
        .route("/billing/license", get(billing::get_license))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    Json(json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "database": database_ok,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
