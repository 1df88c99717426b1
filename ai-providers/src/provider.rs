use async_trait::async_trait;

use crate::error::AiError;
use crate::types::{Completion, GenerateOptions, Prompt};

/// A text-generation backend.
///
/// Implementations translate the provider-neutral [`Prompt`] into the vendor's
/// request format and normalize the response into a [`Completion`].
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Identifier used in run configuration (`"openai"`, `"anthropic"`, ...)
    fn id(&self) -> &str;

    /// Model used when the run does not name one
    fn default_model(&self) -> &str;

    async fn generate(
        &self,
        prompt: &Prompt,
        api_key: &str,
        options: &GenerateOptions,
    ) -> Result<Completion, AiError>;
}
