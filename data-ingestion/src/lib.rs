//! Market data ingestion (Layer 0)
//!
//! Pulls current prices and rolling 24h statistics from the exchange REST API
//! for the assets a strategy run cares about.

pub mod connectors;
pub mod error;
pub mod price_feed;
pub mod symbols;

pub use connectors::{BinanceConnector, ExchangeApi, Ticker24h, TickerPrice};
pub use error::PriceFeedError;
pub use price_feed::{PriceFeedClient, PriceSource};
pub use symbols::{default_assets, to_exchange_symbol, DEFAULT_ASSETS};
