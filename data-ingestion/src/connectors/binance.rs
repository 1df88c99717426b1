use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::ExchangeApi;
use crate::error::PriceFeedError;

const ENDPOINT_ALL_PRICES: &str = "/api/v3/ticker/price";
const ENDPOINT_TICKER_24H: &str = "/api/v3/ticker/24hr";
const WEIGHT_WARN_LEVEL: u32 = 1000;

/// Entry of the bulk price endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// Rolling 24h statistics for one symbol, decimal strings as sent by the exchange
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(rename(deserialize = "priceChange"))]
    pub price_change: String,
    #[serde(rename(deserialize = "priceChangePercent"))]
    pub price_change_percent: String,
    #[serde(rename(deserialize = "highPrice"))]
    pub high_price: String,
    #[serde(rename(deserialize = "lowPrice"))]
    pub low_price: String,
    pub volume: String,
    #[serde(rename(deserialize = "quoteVolume"))]
    pub quote_volume: String,
}

/// Binance spot REST connector
pub struct BinanceConnector {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl BinanceConnector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PriceFeedError> {
        let client = Client::builder()
            .user_agent(concat!("signal-generation/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PriceFeedError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PriceFeedError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PriceFeedError::Timeout {
                        endpoint: endpoint.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    PriceFeedError::Network(e.to_string())
                }
            })?;

        if let Some(used_weight) = response
            .headers()
            .get("x-mbx-used-weight-1m")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            if used_weight > WEIGHT_WARN_LEVEL {
                warn!(used_weight, "High exchange API weight usage");
            } else {
                debug!(used_weight, "Exchange API weight");
            }
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after_ms, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PriceFeedError::Decode(format!("{}: {}", endpoint, e)))
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: String,
) -> PriceFeedError {
    match status.as_u16() {
        429 | 418 => PriceFeedError::RateLimited {
            status: status.as_u16(),
            retry_after_ms,
        },
        code if status.is_server_error() => PriceFeedError::Server { status: code },
        code => PriceFeedError::Http {
            status: code,
            message: body,
        },
    }
}

#[async_trait]
impl ExchangeApi for BinanceConnector {
    fn source(&self) -> String {
        "binance".to_string()
    }

    async fn all_prices(&self) -> Result<Vec<TickerPrice>, PriceFeedError> {
        self.get_json(ENDPOINT_ALL_PRICES, &[]).await
    }

    async fn ticker_24h(&self, exchange_symbol: &str) -> Result<Ticker24h, PriceFeedError> {
        self.get_json(ENDPOINT_TICKER_24H, &[("symbol", exchange_symbol)])
            .await
    }
}
