//! Provider dispatch with single fallback
//!
//! The router owns one client per provider and routes each prompt to the
//! active provider, falling back to the other one exactly once. There are
//! no cascading retries and no shared mutable state across dispatches.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::providers::gemini::GeminiClient;
use crate::providers::openrouter::OpenRouterClient;
use crate::providers::types::{ProviderError, ProviderKind, TextProvider};

/// One failed dispatch leg, kept for the aggregated report
#[derive(Debug)]
pub struct FailedLeg {
    pub provider: ProviderKind,
    pub kind: &'static str,
    pub message: String,
}

/// Error when the active provider and its fallback both failed
#[derive(Debug, Error)]
#[error("all providers failed: {}", format_legs(.legs))]
pub struct DispatchError {
    pub legs: Vec<FailedLeg>,
}

fn format_legs(legs: &[FailedLeg]) -> String {
    legs.iter()
        .map(|leg| format!("{} ({}): {}", leg.provider, leg.kind, leg.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ProviderError> for FailedLeg {
    fn from(err: ProviderError) -> Self {
        Self {
            provider: err.provider(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Routes prompts to a provider with at most one fallback attempt
pub struct ProviderRouter {
    default_provider: ProviderKind,
    openrouter: Arc<dyn TextProvider>,
    gemini: Arc<dyn TextProvider>,
}

impl ProviderRouter {
    /// Build a router over the real HTTP clients
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.default_provider,
            Arc::new(OpenRouterClient::new(config)),
            Arc::new(GeminiClient::new(config)),
        )
    }

    /// Build a router over arbitrary providers (tests inject mocks here)
    pub fn new(
        default_provider: ProviderKind,
        openrouter: Arc<dyn TextProvider>,
        gemini: Arc<dyn TextProvider>,
    ) -> Self {
        Self {
            default_provider,
            openrouter,
            gemini,
        }
    }

    fn leg(&self, kind: ProviderKind) -> &dyn TextProvider {
        match kind {
            ProviderKind::OpenRouter => self.openrouter.as_ref(),
            ProviderKind::Gemini => self.gemini.as_ref(),
        }
    }

    /// Resolve the active provider for one dispatch
    ///
    /// Per-request override wins; an unrecognized name is coerced to the
    /// configured default rather than failing the job.
    fn resolve(&self, requested: Option<&str>) -> ProviderKind {
        match requested {
            None => self.default_provider,
            Some(name) => match name.parse::<ProviderKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!(
                        provider = name,
                        default = %self.default_provider,
                        "unrecognized provider requested, using default"
                    );
                    self.default_provider
                }
            },
        }
    }

    /// Generate text, trying the active provider and then the other one
    pub async fn dispatch(
        &self,
        prompt: &str,
        requested: Option<&str>,
    ) -> Result<String, DispatchError> {
        let active = self.resolve(requested);

        match self.leg(active).generate(prompt).await {
            Ok(text) => Ok(text),
            Err(primary_err) => {
                let fallback = active.fallback();
                warn!(
                    provider = %active,
                    kind = primary_err.kind(),
                    error = %primary_err,
                    "provider failed, trying fallback {fallback}"
                );
                match self.leg(fallback).generate(prompt).await {
                    Ok(text) => {
                        info!(provider = %fallback, "fallback provider succeeded");
                        Ok(text)
                    }
                    Err(fallback_err) => Err(DispatchError {
                        legs: vec![primary_err.into(), fallback_err.into()],
                    }),
                }
            }
        }
    }
}
