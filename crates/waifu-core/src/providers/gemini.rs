//! Google Gemini generateContent client

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::providers::resolve;
use crate::providers::types::{ParsedResponse, ProviderError, ProviderKind, TextProvider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const API_KEY_FILE: &str = ".api-gemini";
const MODEL_FILE: &str = ".model-gemini";
const BODY_TRUNCATE_CHARS: usize = 500;

/// Client for the Gemini generateContent API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    model_override: Option<String>,
    max_tokens: u32,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model_override", &self.model_override)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Request body for generateContent
#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

/// Response body from generateContent
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

/// Extract text from a generateContent response
///
/// No candidates means the prompt was blocked or produced nothing; the
/// block reason is surfaced when the API reports one.
pub fn parse_response(response: &GenerateResponse) -> ParsedResponse {
    if response.candidates.is_empty() {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone());
        return match reason {
            Some(reason) => ParsedResponse::Blocked(reason),
            None => ParsedResponse::Empty,
        };
    }

    let text: String = response.candidates[0]
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.text.as_deref())
        .collect();
    ParsedResponse::from_text(&text)
}

impl GeminiClient {
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
        resolve::resolve_credential(&["GEMINI_API_KEY", "GOOGLE_API_KEY"], API_KEY_FILE)
    }

    fn resolve_model(&self) -> String {
        resolve::resolve_model(self.model_override.as_deref(), MODEL_FILE, DEFAULT_MODEL)
    }
}

#[async_trait::async_trait]
impl TextProvider for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let provider = self.kind();
        let api_key = self.resolve_api_key().ok_or(ProviderError::CredentialMissing {
            provider,
            hint: format!("set GEMINI_API_KEY or GOOGLE_API_KEY or create ~/{API_KEY_FILE}"),
        })?;

        let model = self.resolve_model();
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
            },
        };

        debug!(model = %model, prompt_chars = prompt.len(), "Gemini request");

        let url = format!("{GEMINI_API_BASE}/{model}:generateContent");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
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

        let body: GenerateResponse =
            response.json().await.map_err(|e| ProviderError::Transport {
                provider,
                message: format!("failed to decode response body: {e}"),
            })?;

        parse_response(&body).into_result(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_from(json: serde_json::Value) -> GenerateResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_response_single_part() {
        let response = response_from(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Hi there!"}]}}]
        }));
        assert_eq!(
            parse_response(&response),
            ParsedResponse::Text("Hi there!".to_string())
        );
    }

    #[test]
    fn test_parse_response_concatenates_parts() {
        let response = response_from(serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"text": "Hello "},
                {"text": "world"}
            ]}}]
        }));
        assert_eq!(
            parse_response(&response),
            ParsedResponse::Text("Hello world".to_string())
        );
    }

    #[test]
    fn test_parse_response_blocked_with_reason() {
        let response = response_from(serde_json::json!({
            "candidates": [],
            "promptFeedback": {"blockReason": "SAFETY"}
        }));
        assert_eq!(
            parse_response(&response),
            ParsedResponse::Blocked("SAFETY".to_string())
        );
    }

    #[test]
    fn test_parse_response_no_candidates_no_feedback() {
        let response = response_from(serde_json::json!({}));
        assert_eq!(parse_response(&response), ParsedResponse::Empty);
    }

    #[test]
    fn test_parse_response_candidate_without_text() {
        let response = response_from(serde_json::json!({
            "candidates": [{"content": {"parts": [{}]}}]
        }));
        assert_eq!(parse_response(&response), ParsedResponse::Empty);
    }

    #[test]
    fn test_parse_response_whitespace_only() {
        let response = response_from(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "  \n "}]}}]
        }));
        assert_eq!(parse_response(&response), ParsedResponse::Empty);
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Hello Waifu!".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: 2048,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hello Waifu!");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
    }
}
