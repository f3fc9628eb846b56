//! Server configuration.

use anyhow::Context;

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string (pooler URL for regular queries).
    pub database_url: String,
    /// Direct Postgres URL for migrations; falls back to `database_url`.
    pub database_direct_url: Option<String>,
    /// Address the HTTP server binds to.
    pub bind_address: String,
    /// CORS origin allow-list.
    pub allowed_origins: Vec<String>,
    /// Base URL of the hosted identity provider.
    pub identity_url: String,
    /// Public API key sent alongside bearer tokens when verifying them.
    pub identity_anon_key: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_direct_url = std::env::var("DATABASE_DIRECT_URL").ok();
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // Default to localhost for development; production sets ALLOWED_ORIGINS.
        let allowed_origins = parse_origins(
            &std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
        );

        let identity_url =
            std::env::var("IDENTITY_URL").context("IDENTITY_URL must be set")?;
        let identity_anon_key =
            std::env::var("IDENTITY_ANON_KEY").context("IDENTITY_ANON_KEY must be set")?;

        Ok(Self {
            database_url,
            database_direct_url,
            bind_address,
            allowed_origins,
            identity_url: identity_url.trim_end_matches('/').to_string(),
            identity_anon_key,
        })
    }
}

/// Split a comma-separated origin list, dropping empty entries.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
