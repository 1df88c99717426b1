// Google Gemini generateContent adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::invalid_response;
use crate::error::AiError;
use crate::http::HttpTransport;
use crate::provider::AiProvider;
use crate::types::{Completion, GenerateOptions, Prompt, Usage};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub system_instruction: Content,
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

pub struct GeminiProvider {
    base_url: String,
    default_model: String,
    transport: HttpTransport,
}

impl GeminiProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            default_model: "gemini-1.5-flash".to_string(),
            transport: HttpTransport::new(timeout),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn build_request(&self, prompt: &Prompt, options: &GenerateOptions) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(prompt.system.clone()),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.user.clone()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        }
    }

    pub fn parse_response(
        &self,
        raw: serde_json::Value,
        requested_model: &str,
        latency_ms: u64,
    ) -> Result<Completion, AiError> {
        let response: GenerateContentResponse = serde_json::from_value(raw.clone())
            .map_err(|e| invalid_response("gemini", e.to_string()))?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("gemini", "response has no candidates"))?;

        let content: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(invalid_response("gemini", "candidate has no text"));
        }

        let usage = response
            .usage_metadata
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage,
            provider: "gemini".to_string(),
            model: response
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            finish_reason: candidate.finish_reason,
            latency_ms,
            raw,
        })
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
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
        let model = options.model_or(&self.default_model).to_string();
        let request = self.build_request(prompt, options);
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let (raw, latency_ms) = self
            .transport
            .post_json("gemini", &url, &[("x-goog-api-key", api_key)], &request)
            .await?;

        self.parse_response(raw, &model, latency_ms)
    }
}
