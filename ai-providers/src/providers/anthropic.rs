// Anthropic messages API adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::invalid_response;
use crate::error::AiError;
use crate::http::HttpTransport;
use crate::provider::AiProvider;
use crate::types::{Completion, GenerateOptions, Prompt, Usage};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

pub struct AnthropicProvider {
    base_url: String,
    default_model: String,
    transport: HttpTransport,
}

impl AnthropicProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: ANTHROPIC_BASE_URL.to_string(),
            default_model: "claude-3-5-sonnet-latest".to_string(),
            transport: HttpTransport::new(timeout),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn build_request(&self, prompt: &Prompt, options: &GenerateOptions) -> MessagesRequest {
        MessagesRequest {
            model: options.model_or(&self.default_model).to_string(),
            max_tokens: options.max_tokens,
            system: prompt.system.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.user.clone(),
            }],
            temperature: options.temperature,
        }
    }

    /// Concatenates every text block of the response
    pub fn parse_response(
        &self,
        raw: serde_json::Value,
        requested_model: &str,
        latency_ms: u64,
    ) -> Result<Completion, AiError> {
        let response: MessagesResponse = serde_json::from_value(raw.clone())
            .map_err(|e| invalid_response("anthropic", e.to_string()))?;

        let content: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(invalid_response("anthropic", "response has no text content"));
        }

        let usage = response
            .usage
            .map(|u| Usage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage,
            provider: "anthropic".to_string(),
            model: response
                .model
                .unwrap_or_else(|| requested_model.to_string()),
            finish_reason: response.stop_reason,
            latency_ms,
            raw,
        })
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        api_key: &str,
        options: &GenerateOptions,
    ) -> Result<Completion, AiError> {
        let request = self.build_request(prompt, options);
        let url = format!("{}/messages", self.base_url);

        let (raw, latency_ms) = self
            .transport
            .post_json(
                "anthropic",
                &url,
                &[("x-api-key", api_key), ("anthropic-version", ANTHROPIC_VERSION)],
                &request,
            )
            .await?;

        self.parse_response(raw, &request.model, latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_request_separates_system_prompt() {
        let provider = AnthropicProvider::new(Duration::from_secs(5));
        let options = GenerateOptions {
            model: None,
            max_tokens: 2048,
            temperature: 0.2,
        };
        let request = provider.build_request(&Prompt::new("rules", "question"), &options);

        assert_eq!(request.system, "rules");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert_eq!(request.max_tokens, 2048);
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let provider = AnthropicProvider::new(Duration::from_secs(5));
        let raw = json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "text", "text": "[{\"asset\":"},
                {"type": "text", "text": "\"BTC/USDT\"}]"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 900, "output_tokens": 100}
        });

        let completion = provider.parse_response(raw, "x", 1000).unwrap();
        assert_eq!(completion.content, r#"[{"asset":"BTC/USDT"}]"#);
        assert_eq!(completion.usage, Usage::new(900, 100));
        assert_eq!(completion.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_parse_response_without_text() {
        let provider = AnthropicProvider::new(Duration::from_secs(5));
        let err = provider
            .parse_response(json!({"content": []}), "x", 0)
            .unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse { .. }));
    }
}
