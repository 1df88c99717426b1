//! AI provider adapters
//!
//! One trait ([`AiProvider`]) over the chat/generation APIs of OpenAI,
//! Anthropic, Gemini and the OpenAI-compatible hosts. [`AiClient`] resolves a
//! provider by id, checks credentials and bounds each call with a timeout.

pub mod client;
pub mod error;
pub mod http;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

pub use client::AiClient;
pub use error::AiError;
pub use provider::AiProvider;
pub use providers::{AnthropicProvider, GeminiProvider, OpenAiCompatibleProvider};
pub use registry::ProviderRegistry;
pub use types::{Completion, GenerateOptions, Prompt, Usage};
