//! Bearer token verification via the identity provider.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cache verification results for 60 seconds; parallel requests from one page
/// load reuse the first verification instead of hitting provider rate limits.
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(60);

/// Maximum cache entries, so a flood of unique tokens cannot exhaust memory.
const MAX_CACHE_ENTRIES: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid bearer token")]
    InvalidToken,
}

/// Verified caller identity.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: Uuid,
    pub email: Option<String>,
}

/// Response from the identity provider's user endpoint.
#[derive(Debug, Clone, Deserialize)]
struct IdentityUserResponse {
    id: String,
    email: Option<String>,
}

#[derive(Clone)]
struct CachedAuth {
    user: AuthedUser,
    cached_at: Instant,
}

/// Verifies bearer tokens against the identity provider.
#[derive(Clone)]
pub struct IdentityVerifier {
    http_client: Client,
    base_url: String,
    anon_key: String,
    cache: Arc<RwLock<HashMap<String, CachedAuth>>>,
}

impl IdentityVerifier {
    pub fn new(http_client: Client, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Verify a bearer token, returning the caller's identity.
    ///
    /// Fails closed: any provider error or unexpected response shape is an
    /// invalid token.
    pub async fn verify_bearer(&self, token: &str) -> Result<AuthedUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        if let Some(cached) = self.cache_get(token).await {
            return Ok(cached);
        }

        let url = format!("{}/auth/v1/user", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to reach identity provider");
                AuthError::InvalidToken
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                status = %response.status(),
                "Identity provider rejected bearer token"
            );
            return Err(AuthError::InvalidToken);
        }

        let user: IdentityUserResponse = response
            .json()
            .await
            .map_err(|_| AuthError::InvalidToken)?;

        let user_id = Uuid::parse_str(&user.id).map_err(|_| {
            tracing::error!("Identity provider returned a non-UUID user id");
            AuthError::InvalidToken
        })?;

        let authed = AuthedUser {
            id: user_id,
            email: user.email,
        };

        self.cache_put(token, authed.clone()).await;
        Ok(authed)
    }

    async fn cache_get(&self, token: &str) -> Option<AuthedUser> {
        let cache = self.cache.read().await;
        cache
            .get(token)
            .filter(|entry| entry.cached_at.elapsed() < TOKEN_CACHE_TTL)
            .map(|entry| entry.user.clone())
    }

    async fn cache_put(&self, token: &str, user: AuthedUser) {
        let mut cache = self.cache.write().await;

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.retain(|_, entry| entry.cached_at.elapsed() < TOKEN_CACHE_TTL);
            if cache.len() >= MAX_CACHE_ENTRIES {
                cache.clear();
            }
        }

        cache.insert(
            token.to_string(),
            CachedAuth {
                user,
                cached_at: Instant::now(),
            },
        );
    }
}

/// Extract the bearer token from the Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}
