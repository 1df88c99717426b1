//! Shared HTTP plumbing for the provider adapters

use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::AiError;

/// JSON-over-HTTP transport with a per-request timeout
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// POST `body` and return the decoded JSON body and the latency in milliseconds
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        provider: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: &B,
    ) -> Result<(serde_json::Value, u64), AiError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .timeout(self.timeout);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        debug!(provider, url, "Sending generation request");
        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout {
                    provider: provider.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                AiError::Network {
                    provider: provider.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(provider, status, retry_after_ms, &body));
        }

        let value = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AiError::InvalidResponse {
                provider: provider.to_string(),
                message: format!("response body is not JSON: {}", e),
            })?;

        Ok((value, started.elapsed().as_millis() as u64))
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> AiError {
    let provider = provider.to_string();
    let message = error_message(body);
    match status.as_u16() {
        401 | 403 => AiError::Unauthorized { provider, message },
        429 => AiError::RateLimited {
            provider,
            retry_after_ms,
        },
        code if status.is_server_error() => AiError::Server {
            provider,
            status: code,
        },
        code => AiError::Api {
            provider,
            status: code,
            message,
        },
    }
}

/// Pull `error.message` out of a provider error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let err = classify_status(
            "openai",
            StatusCode::UNAUTHORIZED,
            None,
            r#"{"error": {"message": "Incorrect API key provided"}}"#,
        );
        assert_eq!(
            err,
            AiError::Unauthorized {
                provider: "openai".to_string(),
                message: "Incorrect API key provided".to_string()
            }
        );

        let err = classify_status("groq", StatusCode::TOO_MANY_REQUESTS, Some(1500), "");
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));

        let err = classify_status("anthropic", StatusCode::SERVICE_UNAVAILABLE, None, "");
        assert!(err.is_retryable());

        let err = classify_status("gemini", StatusCode::BAD_REQUEST, None, "plain failure");
        assert_eq!(
            err,
            AiError::Api {
                provider: "gemini".to_string(),
                status: 400,
                message: "plain failure".to_string()
            }
        );
    }
}
