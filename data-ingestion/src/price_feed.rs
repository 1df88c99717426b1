//! Price feed: bulk prices plus best-effort 24h statistics
//!
//! The bulk price call decides the step: if it fails, the fetch fails.
//! The per-asset 24h lookups for the first `stats_top_n` present assets run
//! concurrently and fail in isolation; an asset without statistics is still
//! returned with its price.

use async_trait::async_trait;
use chrono::Utc;
use common::{PriceFeedMetadata, PriceFeedOutput, PriceMap, PriceQuote};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::connectors::{ExchangeApi, Ticker24h};
use crate::error::PriceFeedError;
use crate::symbols::{normalize_assets, to_exchange_symbol};

/// Anything that can produce current prices for a set of assets
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, assets: &[String]) -> Result<PriceFeedOutput, PriceFeedError>;
}

/// Price feed over an exchange REST API
pub struct PriceFeedClient<E> {
    api: Arc<E>,
    stats_top_n: usize,
    stats_timeout: Duration,
}

impl<E: ExchangeApi> PriceFeedClient<E> {
    pub fn new(api: E, stats_top_n: usize, stats_timeout: Duration) -> Self {
        Self {
            api: Arc::new(api),
            stats_top_n,
            stats_timeout,
        }
    }

    /// Fetch prices for `assets` (internal `BASE/QUOTE` symbols)
    pub async fn fetch(&self, assets: &[String]) -> Result<PriceFeedOutput, PriceFeedError> {
        let started = Instant::now();
        let requested = normalize_assets(assets);

        let listed: HashMap<String, Decimal> = self
            .api
            .all_prices()
            .await?
            .into_iter()
            .filter_map(|t| parse_decimal(&t.price).map(|p| (t.symbol.to_uppercase(), p)))
            .collect();

        let mut prices = PriceMap::new();
        let mut present = Vec::new();
        let mut missing_assets = Vec::new();

        for asset in &requested {
            match listed.get(&to_exchange_symbol(asset)) {
                Some(&price) if price > Decimal::ZERO => {
                    prices.insert(asset.clone(), PriceQuote::new(asset.clone(), price));
                    present.push(asset.clone());
                }
                _ => missing_assets.push(asset.clone()),
            }
        }

        if !missing_assets.is_empty() {
            info!(missing = ?missing_assets, "Requested assets not listed by exchange");
        }

        let stats_targets: Vec<String> = present.into_iter().take(self.stats_top_n).collect();
        let lookups = stats_targets.iter().map(|asset| async move {
            let symbol = to_exchange_symbol(asset);
            let result = match tokio::time::timeout(self.stats_timeout, self.api.ticker_24h(&symbol)).await {
                Ok(result) => result,
                Err(_) => Err(PriceFeedError::Timeout {
                    endpoint: format!("ticker_24h/{}", symbol),
                    timeout_ms: self.stats_timeout.as_millis() as u64,
                }),
            };
            (asset.clone(), result)
        });

        let mut stats_fetched = 0;
        let mut stats_failed = Vec::new();
        for (asset, result) in join_all(lookups).await {
            match result {
                Ok(ticker) => {
                    if let Some(quote) = prices.get_mut(&asset) {
                        apply_ticker(quote, &ticker);
                        stats_fetched += 1;
                    }
                }
                Err(e) => {
                    warn!(asset = %asset, error = %e, "24h statistics unavailable");
                    stats_failed.push(asset);
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            assets = prices.len(),
            stats_fetched,
            stats_failed = stats_failed.len(),
            latency_ms,
            "Price fetch complete"
        );

        Ok(PriceFeedOutput {
            prices,
            metadata: PriceFeedMetadata {
                source: self.api.source(),
                fetched_at: Utc::now(),
                requested_assets: requested,
                missing_assets,
                stats_fetched,
                stats_failed,
                latency_ms,
            },
        })
    }
}

#[async_trait]
impl<E: ExchangeApi> PriceSource for PriceFeedClient<E> {
    async fn fetch(&self, assets: &[String]) -> Result<PriceFeedOutput, PriceFeedError> {
        PriceFeedClient::fetch(self, assets).await
    }
}

fn apply_ticker(quote: &mut PriceQuote, ticker: &Ticker24h) {
    quote.change_24h = parse_decimal(&ticker.price_change);
    quote.change_percent_24h = parse_decimal(&ticker.price_change_percent);
    quote.high_24h = parse_decimal(&ticker.high_price);
    quote.low_24h = parse_decimal(&ticker.low_price);
    quote.volume_24h = parse_decimal(&ticker.volume);
    quote.quote_volume_24h = parse_decimal(&ticker.quote_volume);
}

/// Exchange decimals arrive as strings ("95000.01000000")
fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str_exact(value.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{MockExchangeApi, TickerPrice};
    use rust_decimal_macros::dec;

    fn ticker_price(symbol: &str, price: &str) -> TickerPrice {
        TickerPrice {
            symbol: symbol.to_string(),
            price: price.to_string(),
        }
    }

    fn ticker_24h(symbol: &str, change_pct: &str) -> Ticker24h {
        Ticker24h {
            symbol: symbol.to_string(),
            price_change: "100.0".to_string(),
            price_change_percent: change_pct.to_string(),
            high_price: "96000.0".to_string(),
            low_price: "90000.0".to_string(),
            volume: "1200.5".to_string(),
            quote_volume: "114000000.0".to_string(),
        }
    }

    fn mock_with_prices() -> MockExchangeApi {
        let mut api = MockExchangeApi::new();
        api.expect_source().returning(|| "binance".to_string());
        api.expect_all_prices().returning(|| {
            Ok(vec![
                ticker_price("BTCUSDT", "95000.00"),
                ticker_price("ETHUSDT", "3500.10"),
                ticker_price("SOLUSDT", "180.5"),
            ])
        });
        api
    }

    fn assets(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_asset_is_reported_not_fatal() {
        let mut api = mock_with_prices();
        api.expect_ticker_24h()
            .returning(|symbol| Ok(ticker_24h(symbol, "1.5")));

        let client = PriceFeedClient::new(api, 10, Duration::from_secs(1));
        let output = client
            .fetch(&assets(&["BTC/USDT", "NOPE/USDT"]))
            .await
            .unwrap();

        assert_eq!(output.prices.len(), 1);
        assert_eq!(output.prices["BTC/USDT"].price, dec!(95000));
        assert_eq!(output.metadata.missing_assets, vec!["NOPE/USDT"]);
        assert_eq!(output.metadata.source, "binance");
    }

    #[tokio::test]
    async fn test_stats_failure_is_isolated() {
        let mut api = mock_with_prices();
        api.expect_ticker_24h().returning(|symbol| {
            if symbol == "ETHUSDT" {
                Err(PriceFeedError::Server { status: 503 })
            } else {
                Ok(ticker_24h(symbol, "2.25"))
            }
        });

        let client = PriceFeedClient::new(api, 10, Duration::from_secs(1));
        let output = client
            .fetch(&assets(&["BTC/USDT", "ETH/USDT"]))
            .await
            .unwrap();

        assert_eq!(output.prices.len(), 2);
        assert_eq!(output.prices["BTC/USDT"].change_percent_24h, Some(dec!(2.25)));
        assert_eq!(output.prices["BTC/USDT"].quote_volume_24h, Some(dec!(114000000)));
        assert!(output.prices["ETH/USDT"].change_percent_24h.is_none());
        assert_eq!(output.prices["ETH/USDT"].price, dec!(3500.10));
        assert_eq!(output.metadata.stats_fetched, 1);
        assert_eq!(output.metadata.stats_failed, vec!["ETH/USDT"]);
    }

    #[tokio::test]
    async fn test_stats_lookups_are_bounded() {
        let mut api = mock_with_prices();
        api.expect_ticker_24h()
            .times(2)
            .returning(|symbol| Ok(ticker_24h(symbol, "0.5")));

        let client = PriceFeedClient::new(api, 2, Duration::from_secs(1));
        let output = client
            .fetch(&assets(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]))
            .await
            .unwrap();

        assert_eq!(output.prices.len(), 3);
        assert_eq!(output.metadata.stats_fetched, 2);
        assert!(output.prices["SOL/USDT"].change_percent_24h.is_none());
    }

    #[tokio::test]
    async fn test_bulk_failure_is_fatal() {
        let mut api = MockExchangeApi::new();
        api.expect_all_prices()
            .returning(|| Err(PriceFeedError::Server { status: 500 }));
        api.expect_ticker_24h().never();

        let client = PriceFeedClient::new(api, 10, Duration::from_secs(1));
        let err = client.fetch(&assets(&["BTC/USDT"])).await.unwrap_err();
        assert_eq!(err, PriceFeedError::Server { status: 500 });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_decimal_keeps_exchange_precision() {
        assert_eq!(parse_decimal("0.00001234"), Some(dec!(0.00001234)));
        assert_eq!(parse_decimal(" 95000.01000000 "), Some(dec!(95000.01)));
        assert_eq!(parse_decimal("n/a"), None);
    }
}
