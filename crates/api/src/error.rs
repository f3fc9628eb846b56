//! API error to HTTP response conversion.
//!
//! Every handler failure becomes a structured JSON body; nothing beyond the
//! message string leaves the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use renderloft_billing::BillingError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Server configuration error")]
    Config,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },

    #[error("{0}")]
    Billing(BillingError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Config => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Billing(err) => match err {
                BillingError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                // Validation, not-found, and processor failures all surface
                // as 400 with the message string.
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError::Billing(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Configuration details stay in the logs.
        let message = match &self {
            ApiError::Config => "Server configuration error".to_string(),
            ApiError::Billing(BillingError::Config(detail)) => {
                tracing::error!(detail = %detail, "Billing configuration error");
                "Server configuration error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        let mut response = (status, body).into_response();

        if let ApiError::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}
