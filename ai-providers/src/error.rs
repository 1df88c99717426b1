use std::time::Duration;
use thiserror::Error;

/// AI provider errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AiError {
    #[error("no API key configured for provider {provider}")]
    MissingApiKey { provider: String },

    #[error("unknown AI provider: {0}")]
    UnknownProvider(String),

    /// HTTP 401/403
    #[error("[{provider}] authorization failed: {message}")]
    Unauthorized { provider: String, message: String },

    #[error("[{provider}] rate limited")]
    RateLimited {
        provider: String,
        retry_after_ms: Option<u64>,
    },

    #[error("[{provider}] server error (HTTP {status})")]
    Server { provider: String, status: u16 },

    #[error("[{provider}] request timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("[{provider}] API error {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("[{provider}] network error: {message}")]
    Network { provider: String, message: String },

    #[error("[{provider}] invalid response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl AiError {
    /// Rate limits, 5xx responses and timeouts may succeed on a later attempt.
    /// Everything else is returned to the caller as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::RateLimited { .. } | AiError::Server { .. } | AiError::Timeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AiError::Timeout { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AiError::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}
