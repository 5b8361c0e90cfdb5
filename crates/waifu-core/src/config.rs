//! Environment-sourced configuration
//!
//! All settings come from the process environment (the binary loads a
//! `.env` file first). The `PROVIDER` variable overrides
//! `DEFAULT_PROVIDER` at load time so the rest of the system only ever
//! sees the resolved default.

use anyhow::{Context, Result};
use tracing::warn;

use crate::providers::types::ProviderKind;

/// Runtime configuration for the queue server and workers
#[derive(Debug, Clone)]
pub struct Config {
    /// Generation length cap forwarded to providers
    pub max_new_tokens: u32,
    /// Address of the Redis backing store
    pub redis_url: String,
    /// Provider used when a request does not name one
    pub default_provider: ProviderKind,
    /// Per-request HTTP timeout for provider calls
    pub request_timeout_seconds: u64,
    /// How long a finished job's record is retained
    pub result_ttl_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_new_tokens: 2048,
            redis_url: "redis://localhost:6379".to_string(),
            default_provider: ProviderKind::OpenRouter,
            request_timeout_seconds: 60,
            result_ttl_seconds: 3600,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function
    ///
    /// `load()` delegates here with `std::env::var`; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = non_empty(lookup("MAX_NEW_TOKENS")) {
            config.max_new_tokens = raw
                .parse()
                .with_context(|| format!("invalid MAX_NEW_TOKENS: {raw:?}"))?;
        }
        if let Some(url) = non_empty(lookup("REDIS_URL")) {
            config.redis_url = url;
        }
        if let Some(raw) = non_empty(lookup("REQUEST_TIMEOUT_SECONDS")) {
            config.request_timeout_seconds = raw
                .parse()
                .with_context(|| format!("invalid REQUEST_TIMEOUT_SECONDS: {raw:?}"))?;
        }
        if let Some(raw) = non_empty(lookup("RESULT_TTL_SECONDS")) {
            config.result_ttl_seconds = raw
                .parse()
                .with_context(|| format!("invalid RESULT_TTL_SECONDS: {raw:?}"))?;
        }

        if let Some(name) = non_empty(lookup("DEFAULT_PROVIDER")) {
            config.default_provider = parse_provider(&name, config.default_provider);
        }
        // PROVIDER is a runtime override of the configured default.
        if let Some(name) = non_empty(lookup("PROVIDER")) {
            config.default_provider = parse_provider(&name, config.default_provider);
        }

        Ok(config)
    }

    /// Provider timeout as a [`std::time::Duration`]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_seconds)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a provider name, keeping `current` when the name is unrecognized
fn parse_provider(name: &str, current: ProviderKind) -> ProviderKind {
    match name.parse::<ProviderKind>() {
        Ok(kind) => kind,
        Err(_) => {
            warn!(provider = name, "unrecognized provider name, keeping {current}");
            current
        }
    }
}
