use std::time::Duration;

use common::AiSettings;
use tracing::{info, warn};

use crate::error::AiError;
use crate::registry::ProviderRegistry;
use crate::types::{Completion, GenerateOptions, Prompt};

/// Provider-agnostic entry point for one generation call
pub struct AiClient {
    registry: ProviderRegistry,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl AiClient {
    pub fn new(registry: ProviderRegistry, settings: &AiSettings) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(settings.request_timeout_secs),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn from_settings(settings: &AiSettings) -> Self {
        Self::new(ProviderRegistry::with_defaults(settings), settings)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Send `prompt` to `provider_id`.
    ///
    /// An unknown provider or a missing key fails before any request is made.
    /// The whole call is bounded by the client timeout; an abandoned call
    /// surfaces as [`AiError::Timeout`].
    pub async fn call(
        &self,
        prompt: &Prompt,
        provider_id: &str,
        api_key: Option<&str>,
        model: Option<&str>,
    ) -> Result<Completion, AiError> {
        let provider = self.registry.get(provider_id)?;

        let api_key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AiError::MissingApiKey {
                provider: provider.id().to_string(),
            })?;

        let options = GenerateOptions {
            model: model.map(str::to_string),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let model_name = options.model_or(provider.default_model()).to_string();

        info!(
            provider = provider.id(),
            model = %model_name,
            prompt_chars = prompt.system.len() + prompt.user.len(),
            "Calling AI provider"
        );

        let completion =
            match tokio::time::timeout(self.timeout, provider.generate(prompt, api_key, &options))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(provider = provider.id(), "AI call abandoned after {:?}", self.timeout);
                    return Err(AiError::Timeout {
                        provider: provider.id().to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            };

        info!(
            provider = provider.id(),
            model = %completion.model,
            latency_ms = completion.latency_ms,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            "AI response received"
        );

        Ok(completion)
    }
}
