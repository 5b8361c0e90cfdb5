//! Provider clients and dispatch
//!
//! Two concrete providers (OpenRouter and Google Gemini) implement the
//! [`TextProvider`] trait and are composed by [`ProviderRouter`], which
//! falls back from the active provider to the other one exactly once.

pub mod gemini;
pub mod openrouter;
pub mod resolve;
pub mod router;
pub mod types;

pub use gemini::GeminiClient;
pub use openrouter::OpenRouterClient;
pub use router::{DispatchError, ProviderRouter};
pub use types::{ProviderError, ProviderKind, TextProvider};
