//! Downgrade scheduling endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use renderloft_shared::{BillingCycle, PlanTier};

use crate::auth::extract_bearer_token;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DowngradeRequest {
    /// `"ping"` turns the call into a warm-up probe.
    pub action: Option<String>,
    pub plan_tier: Option<String>,
    pub billing_cycle: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DowngradeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cycle: Option<String>,
}

/// Schedule a plan downgrade for the authenticated caller, effective at the
/// end of the current billing period.
///
/// The body is parsed manually so malformed JSON still gets the structured
/// `{success: false, error}` shape instead of an extractor rejection.
pub async fn schedule_downgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<DowngradeResponse>, ApiError> {
    let request: DowngradeRequest = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;

    // Warm-up probe: no auth, no billing access, nothing to leak.
    if request.action.as_deref() == Some("ping") {
        return Ok(Json(DowngradeResponse {
            success: true,
            message: Some("pong".to_string()),
            effective_at: None,
            target_plan: None,
            target_cycle: None,
        }));
    }

    let billing = state.billing.as_ref().ok_or(ApiError::Config)?;

    let client_ip = client_ip(&headers);
    let ip_check = billing
        .rate_limiter
        .check_auth_by_ip(&client_ip)
        .await
        .map_err(ApiError::Billing)?;
    if !ip_check.allowed {
        return Err(ApiError::RateLimited {
            retry_after_seconds: ip_check.retry_after_seconds.unwrap_or(60),
        });
    }

    // Fail closed on anything short of a verified token.
    let token = extract_bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let user = state
        .verifier
        .verify_bearer(&token)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    let user_check = billing
        .rate_limiter
        .check_user(user.id)
        .await
        .map_err(ApiError::Billing)?;
    if !user_check.allowed {
        return Err(ApiError::RateLimited {
            retry_after_seconds: user_check.retry_after_seconds.unwrap_or(60),
        });
    }

    let plan_tier = request
        .plan_tier
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("planTier is required".to_string()))?;
    let target_plan = PlanTier::parse(plan_tier)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid plan tier: {}", plan_tier)))?;

    let billing_cycle = request
        .billing_cycle
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("billingCycle is required".to_string()))?;
    let target_cycle = match BillingCycle::parse(billing_cycle) {
        Some(cycle @ (BillingCycle::Monthly | BillingCycle::Yearly)) => cycle,
        _ => {
            return Err(ApiError::BadRequest(format!(
                "Invalid billing cycle: {}",
                billing_cycle
            )))
        }
    };

    let scheduled = billing
        .subscriptions
        .schedule_downgrade(user.id, target_plan, target_cycle)
        .await?;

    let effective_at = scheduled
        .effective_at
        .format(&Rfc3339)
        .map_err(|e| ApiError::Billing(renderloft_billing::BillingError::Internal(e.to_string())))?;

    Ok(Json(DowngradeResponse {
        success: true,
        message: None,
        effective_at: Some(effective_at),
        target_plan: Some(scheduled.target_plan.display_name().to_string()),
        target_cycle: Some(scheduled.target_cycle.to_string()),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    pub status: String,
    pub plan_tier: Option<String>,
    pub billing_cycle: String,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Serialize)]
pub struct LicenseResponse {
    pub success: bool,
    pub license: Option<LicenseInfo>,
}

/// Return the authenticated caller's license record, as cached from Stripe.
pub async fn get_license(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LicenseResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::Config)?;

    let token = extract_bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    let user = state
        .verifier
        .verify_bearer(&token)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    let record = billing
        .licenses
        .get_license(user.id)
        .await
        .map_err(ApiError::Billing)?;

    let license = record.map(|record| LicenseInfo {
        status: record.status.clone(),
        plan_tier: record
            .plan_tier()
            .map(|tier| tier.display_name().to_string()),
        billing_cycle: record.billing_cycle.clone(),
        current_period_end: record
            .current_period_end
            .and_then(|end| end.format(&Rfc3339).ok()),
        cancel_at_period_end: record.cancel_at_period_end,
    });

    Ok(Json(LicenseResponse {
        success: true,
        license,
    }))
}

/// Client address for rate limiting; the platform terminates TLS ahead of us,
/// so the peer address is the proxy and the real client is in the forwarding
/// header.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
