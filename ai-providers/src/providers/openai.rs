// OpenAI chat completions adapter
// Also serves the OpenAI-compatible APIs (DeepSeek, Groq, OpenRouter)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::invalid_response;
use crate::error::AiError;
use crate::http::HttpTransport;
use crate::provider::AiProvider;
use crate::types::{Completion, GenerateOptions, Prompt, Usage};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// Chat completions provider for any OpenAI-compatible endpoint
pub struct OpenAiCompatibleProvider {
    id: String,
    base_url: String,
    default_model: String,
    transport: HttpTransport,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            transport: HttpTransport::new(timeout),
        }
    }

    pub fn openai(timeout: Duration) -> Self {
        Self::new("openai", OPENAI_BASE_URL, "gpt-4o-mini", timeout)
    }

    pub fn deepseek(timeout: Duration) -> Self {
        Self::new("deepseek", DEEPSEEK_BASE_URL, "deepseek-chat", timeout)
    }

    pub fn groq(timeout: Duration) -> Self {
        Self::new("groq", GROQ_BASE_URL, "llama-3.3-70b-versatile", timeout)
    }

    pub fn openrouter(timeout: Duration) -> Self {
        Self::new("openrouter", OPENROUTER_BASE_URL, "openai/gpt-4o-mini", timeout)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_request(&self, prompt: &Prompt, options: &GenerateOptions) -> ChatRequest {
        ChatRequest {
            model: options.model_or(&self.default_model).to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        }
    }

    pub fn parse_response(
        &self,
        raw: serde_json::Value,
        requested_model: &str,
        latency_ms: u64,
    ) -> Result<Completion, AiError> {
        let response: ChatResponse = serde_json::from_value(raw.clone())
            .map_err(|e| invalid_response(&self.id, e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response(&self.id, "response has no choices"))?;

        let usage = response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content: choice.message.content,
            usage,
            provider: self.id.clone(),
            model: response
                .model
                .unwrap_or_else(|| requested_model.to_string()),
            finish_reason: choice.finish_reason,
            latency_ms,
            raw,
        })
    }
}

#[async_trait]
impl AiProvider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.id
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
        let url = format!("{}/chat/completions", self.base_url);
        let auth = format!("Bearer {}", api_key);

        let (raw, latency_ms) = self
            .transport
            .post_json(&self.id, &url, &[("Authorization", auth.as_str())], &request)
            .await?;

        self.parse_response(raw, &request.model, latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_request_uses_default_model() {
        let provider = OpenAiCompatibleProvider::deepseek(Duration::from_secs(5));
        let request = provider.build_request(
            &Prompt::new("You are a trader", "Find trades"),
            &GenerateOptions::default(),
        );

        assert_eq!(request.model, "deepseek-chat");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "Find trades");

        let request = provider.build_request(
            &Prompt::new("s", "u"),
            &GenerateOptions::default().with_model(Some("deepseek-reasoner")),
        );
        assert_eq!(request.model, "deepseek-reasoner");
    }

    #[test]
    fn test_parse_response() {
        let provider = OpenAiCompatibleProvider::openai(Duration::from_secs(5));
        let raw = json!({
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "message": {"role": "assistant", "content": "[]"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        });

        let completion = provider.parse_response(raw, "gpt-4o-mini", 420).unwrap();
        assert_eq!(completion.content, "[]");
        assert_eq!(completion.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(completion.usage.total_tokens, 150);
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.latency_ms, 420);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let provider = OpenAiCompatibleProvider::groq(Duration::from_secs(5));
        let err = provider
            .parse_response(json!({"choices": []}), "m", 0)
            .unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse { .. }));
    }

    #[test]
    fn test_base_url_override() {
        let provider = OpenAiCompatibleProvider::openai(Duration::from_secs(5))
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(provider.base_url(), "http://localhost:8080/v1");
    }
}
