//! Stripe webhook endpoint.
//!
//! The body must stay raw for signature verification, so this handler takes
//! `String` rather than a JSON extractor. Response codes follow Stripe's
//! retry semantics: 400 only for signature failures, 500 only when the
//! service is unconfigured or the event could not be recorded (retry is the
//! self-heal path there), 200 for everything else including application-level
//! processing errors, which are recorded on the event row instead.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use renderloft_billing::WebhookOutcome;

use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(billing) = &state.billing else {
        tracing::error!("Webhook received but Stripe is not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Billing is not configured" })),
        )
            .into_response();
    };

    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing Stripe signature" })),
        )
            .into_response();
    };

    // Never process an unverified payload.
    let event = match billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook with invalid signature");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid webhook signature" })),
            )
                .into_response();
        }
    };

    match billing.webhooks.handle_event(event, &body).await {
        Ok(outcome) => {
            if outcome == WebhookOutcome::Duplicate {
                tracing::debug!("Acknowledged duplicate webhook delivery");
            }
            (StatusCode::OK, Json(json!({ "received": true }))).into_response()
        }
        Err(e) => {
            // Only storage failures escape handle_event; the event was not
            // recorded, so a retry from Stripe is the recovery path.
            tracing::error!(error = %e, "Failed to record webhook event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to record event" })),
            )
                .into_response()
        }
    }
}
