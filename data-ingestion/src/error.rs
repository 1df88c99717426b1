use std::time::Duration;
use thiserror::Error;

/// Failures talking to the exchange REST API
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceFeedError {
    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// HTTP 429, or 418 once the exchange has banned the IP
    #[error("rate limited by exchange (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after_ms: Option<u64>,
    },

    #[error("exchange server error (HTTP {status})")]
    Server { status: u16 },

    #[error("exchange returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode exchange response: {0}")]
    Decode(String),
}

impl PriceFeedError {
    /// Timeouts, rate limits and 5xx responses are transient
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PriceFeedError::Timeout { .. }
                | PriceFeedError::RateLimited { .. }
                | PriceFeedError::Server { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PriceFeedError::Timeout { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PriceFeedError::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}
