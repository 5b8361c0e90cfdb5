//! OpenRouter chat-completions client

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::providers::resolve;
use crate::providers::types::{ParsedResponse, ProviderError, ProviderKind, TextProvider};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "deepseek/deepseek-chat-v3-0324:free";
const API_KEY_FILE: &str = ".api-openrouter";
const MODEL_FILE: &str = ".model-openrouter";
const BODY_TRUNCATE_CHARS: usize = 500;

/// Client for the OpenRouter chat-completions API
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    model_override: Option<String>,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("model_override", &self.model_override)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Request body for the chat-completions endpoint
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: &'static str,
    content: String,
}

/// Response body from the chat-completions endpoint
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extract text from a chat-completions response
///
/// Pure over the deserialized body so shape handling is testable offline.
pub fn parse_response(response: &ChatResponse) -> ParsedResponse {
    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.as_ref())
        .and_then(|message| message.content.as_deref());
    match content {
        Some(text) => ParsedResponse::from_text(text),
        None => ParsedResponse::Empty,
    }
}

impl OpenRouterClient {
    /// Build a client from runtime configuration
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            model_override: None,
            max_tokens: config.max_new_tokens,
        }
    }

    fn resolve_api_key(&self) -> Option<String> {
        resolve::resolve_credential(&["OPENROUTER_API_KEY"], API_KEY_FILE)
    }

    fn resolve_model(&self) -> String {
        resolve::resolve_model(self.model_override.as_deref(), MODEL_FILE, DEFAULT_MODEL)
    }
}

#[async_trait::async_trait]
impl TextProvider for OpenRouterClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let provider = self.kind();
        let api_key = self.resolve_api_key().ok_or(ProviderError::CredentialMissing {
            provider,
            hint: format!("set OPENROUTER_API_KEY or create ~/{API_KEY_FILE}"),
        })?;

        let model = self.resolve_model();
        let request = ChatRequest {
            model: model.clone(),
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: 0.2,
            max_tokens: self.max_tokens,
        };

        debug!(model = %model, prompt_chars = prompt.len(), "OpenRouter request");

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider,
                status: status.as_u16(),
                body: resolve::truncate_body(&body, BODY_TRUNCATE_CHARS),
            });
        }

        let body: ChatResponse =
            response.json().await.map_err(|e| ProviderError::Transport {
                provider,
                message: format!("failed to decode response body: {e}"),
            })?;

        parse_response(&body).into_result(provider)
    }
}
