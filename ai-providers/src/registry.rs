use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::AiSettings;
use tracing::debug;

use crate::error::AiError;
use crate::provider::AiProvider;
use crate::providers::{AnthropicProvider, GeminiProvider, OpenAiCompatibleProvider};

/// Provider lookup by configuration id
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider, honoring base URL overrides from settings
    pub fn with_defaults(settings: &AiSettings) -> Self {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let base_url = |id: &str| settings.base_urls.get(id).map(String::as_str);

        let openai_compatible = [
            OpenAiCompatibleProvider::openai(timeout),
            OpenAiCompatibleProvider::deepseek(timeout),
            OpenAiCompatibleProvider::groq(timeout),
            OpenAiCompatibleProvider::openrouter(timeout),
        ];

        let mut registry = Self::new();
        for provider in openai_compatible {
            let provider = match base_url(provider.id()) {
                Some(url) => provider.with_base_url(url),
                None => provider,
            };
            registry.register(Arc::new(provider));
        }

        let mut anthropic = AnthropicProvider::new(timeout);
        if let Some(url) = base_url("anthropic") {
            anthropic = anthropic.with_base_url(url);
        }
        registry.register(Arc::new(anthropic));

        let mut gemini = GeminiProvider::new(timeout);
        if let Some(url) = base_url("gemini") {
            gemini = gemini.with_base_url(url);
        }
        registry.register(Arc::new(gemini));

        registry
    }

    /// Add or replace a provider under its id
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        let id = provider.id().to_lowercase();
        debug!(provider = %id, "Registered AI provider");
        self.providers.insert(id, provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn AiProvider>, AiError> {
        self.providers
            .get(&id.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| AiError::UnknownProvider(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
