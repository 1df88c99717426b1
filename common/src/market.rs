//! Market price model shared by the price feed and the signal pipeline

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current price of one asset, optionally decorated with 24h statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Internal `BASE/QUOTE` symbol
    pub symbol: String,
    pub price: Decimal,
    #[serde(default)]
    pub change_24h: Option<Decimal>,
    #[serde(default)]
    pub change_percent_24h: Option<Decimal>,
    #[serde(default)]
    pub high_24h: Option<Decimal>,
    #[serde(default)]
    pub low_24h: Option<Decimal>,
    /// Base-asset volume
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
    /// Quote-asset volume
    #[serde(default)]
    pub quote_volume_24h: Option<Decimal>,
}

impl PriceQuote {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_24h: None,
            change_percent_24h: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            quote_volume_24h: None,
        }
    }

    pub fn has_stats(&self) -> bool {
        self.change_percent_24h.is_some()
    }

    /// Position of the current price inside the 24h range (0 = low, 1 = high).
    /// `None` without stats or when the range is degenerate.
    pub fn range_position(&self) -> Option<Decimal> {
        let (high, low) = (self.high_24h?, self.low_24h?);
        let range = high - low;
        if range <= Decimal::ZERO {
            return None;
        }
        Some(((self.price - low) / range).clamp(Decimal::ZERO, Decimal::ONE))
    }
}

/// Quotes keyed by internal symbol. Ordered so that every derived view is deterministic.
pub type PriceMap = BTreeMap<String, PriceQuote>;

/// Bookkeeping about one price fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFeedMetadata {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub requested_assets: Vec<String>,
    /// Requested but not listed by the exchange
    pub missing_assets: Vec<String>,
    pub stats_fetched: usize,
    /// Symbols whose 24h statistics could not be retrieved
    pub stats_failed: Vec<String>,
    pub latency_ms: u64,
}

/// Output of the price fetch step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFeedOutput {
    pub prices: PriceMap,
    pub metadata: PriceFeedMetadata,
}
