//! Request rate limiting.
//!
//! Fixed one-minute windows over an in-memory counter map. Keys are hashed
//! before storage so raw tokens and addresses never sit in memory longer than
//! the request that carried them. The map is bounded; stale windows are
//! evicted by `cleanup()` or when the bound is hit.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::BillingResult;

/// Auth endpoint limit per IP per minute.
const AUTH_IP_LIMIT: u32 = 10;

/// Downgrade endpoint limit per user per minute.
const USER_LIMIT: u32 = 30;

/// Upper bound on tracked windows; prevents memory exhaustion from unique-key
/// floods.
const MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window: i64,
    count: u32,
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining_minute: u32,
    pub retry_after_seconds: Option<u64>,
}

/// In-memory rate limiter.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, WindowCounter>>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check an authentication attempt from an IP address.
    pub async fn check_auth_by_ip(&self, ip: &str) -> BillingResult<RateLimitResult> {
        self.check(&format!("auth:{}", ip), AUTH_IP_LIMIT).await
    }

    /// Check a billing request from an authenticated user.
    pub async fn check_user(&self, user_id: Uuid) -> BillingResult<RateLimitResult> {
        self.check(&format!("user:{}", user_id), USER_LIMIT).await
    }

    /// Check an arbitrary key against a limit.
    pub async fn check(&self, key: &str, limit: u32) -> BillingResult<RateLimitResult> {
        let hashed = hash_key(key);
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let window = now / 60;

        let mut windows = self.windows.lock().await;

        if windows.len() >= MAX_ENTRIES {
            windows.retain(|_, counter| counter.window == window);
        }

        let counter = windows.entry(hashed).or_insert(WindowCounter { window, count: 0 });

        if counter.window != window {
            counter.window = window;
            counter.count = 0;
        }

        if counter.count >= limit {
            let retry_after = 60 - (now % 60).unsigned_abs();
            return Ok(RateLimitResult {
                allowed: false,
                remaining_minute: 0,
                retry_after_seconds: Some(retry_after),
            });
        }

        counter.count += 1;
        Ok(RateLimitResult {
            allowed: true,
            remaining_minute: limit - counter.count,
            retry_after_seconds: None,
        })
    }

    /// Drop counters from past windows.
    pub async fn cleanup(&self) {
        let window = time::OffsetDateTime::now_utc().unix_timestamp() / 60;
        let mut windows = self.windows.lock().await;
        windows.retain(|_, counter| counter.window == window);
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
