pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatibleProvider;

use crate::error::AiError;

pub(crate) fn invalid_response(provider: &str, message: impl Into<String>) -> AiError {
    AiError::InvalidResponse {
        provider: provider.to_string(),
        message: message.into(),
    }
}
