//! Provider-agnostic types for text generation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The external text-generation services this system can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenRouter,
    Gemini,
}

impl ProviderKind {
    /// The provider dispatch falls back to when this one fails
    pub fn fallback(&self) -> ProviderKind {
        match self {
            Self::OpenRouter => Self::Gemini,
            Self::Gemini => Self::OpenRouter,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenRouter => write!(f, "openrouter"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "gemini" => Ok(Self::Gemini),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Error for a provider name that is neither `openrouter` nor `gemini`
#[derive(Debug, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

/// A single provider call's classified failure
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} credential missing: {hint}")]
    CredentialMissing {
        provider: ProviderKind,
        hint: String,
    },

    #[error("{provider} transport error: {message}")]
    Transport {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} returned an empty or blocked response{}", reason_suffix(.reason))]
    EmptyOrBlocked {
        provider: ProviderKind,
        reason: Option<String>,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: ProviderKind,
        status: u16,
        body: String,
    },
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" (reason: {r})"),
        None => String::new(),
    }
}

impl ProviderError {
    /// Which provider this failure came from
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::CredentialMissing { provider, .. }
            | Self::Transport { provider, .. }
            | Self::EmptyOrBlocked { provider, .. }
            | Self::Http { provider, .. } => *provider,
        }
    }

    /// Stable failure-kind label for logs and aggregated reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredentialMissing { .. } => "credential-missing",
            Self::Transport { .. } => "transport-error",
            Self::EmptyOrBlocked { .. } => "empty-or-blocked",
            Self::Http { .. } => "http-error",
        }
    }
}

/// Trait that both provider clients implement
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Which provider this client talks to
    fn kind(&self) -> ProviderKind;

    /// Generate text for a prompt
    ///
    /// Succeeds only with a non-empty trimmed payload; every failure is
    /// classified as one of the [`ProviderError`] variants.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Tagged result of parsing a provider's response body
///
/// Parsing is separated from the HTTP call so response-shape handling is
/// testable without a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    /// Non-empty generated text
    Text(String),
    /// The provider reported the prompt was blocked
    Blocked(String),
    /// The response carried no usable text
    Empty,
}

impl ParsedResponse {
    /// Wrap trimmed text, mapping whitespace-only output to `Empty`
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Self::Empty
        } else {
            Self::Text(trimmed.to_string())
        }
    }

    /// Convert into the provider contract's result type
    pub fn into_result(self, provider: ProviderKind) -> Result<String, ProviderError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Blocked(reason) => Err(ProviderError::EmptyOrBlocked {
                provider,
                reason: Some(reason),
            }),
            Self::Empty => Err(ProviderError::EmptyOrBlocked {
                provider,
                reason: None,
            }),
        }
    }
}
