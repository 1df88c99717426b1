pub mod binance;

pub use binance::{BinanceConnector, Ticker24h, TickerPrice};

use async_trait::async_trait;

use crate::error::PriceFeedError;

/// Raw exchange REST surface used by the price feed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Name reported in the feed metadata
    fn source(&self) -> String;

    /// Current price of every listed symbol
    async fn all_prices(&self) -> Result<Vec<TickerPrice>, PriceFeedError>;

    /// 24h statistics for one exchange-form symbol (`BTCUSDT`)
    async fn ticker_24h(&self, exchange_symbol: &str) -> Result<Ticker24h, PriceFeedError>;
}
