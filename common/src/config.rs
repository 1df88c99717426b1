//! Pipeline settings
//!
//! Operator-level tuning that is not part of a single run's input:
//! endpoints, timeouts, retry budgets and the numeric thresholds shared by the
//! prompt contract and the validator chain.

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level pipeline settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub exchange: ExchangeSettings,

    #[serde(default)]
    pub ai: AiSettings,

    #[serde(default)]
    pub steps: StepSettings,

    #[serde(default)]
    pub analysis: AnalysisSettings,

    #[serde(default)]
    pub validation: ValidationSettings,
}

/// Exchange REST API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    #[serde(default = "default_exchange_base_url")]
    pub base_url: String,

    /// Timeout for a single HTTP request (seconds)
    #[serde(default = "default_exchange_request_timeout")]
    pub request_timeout_secs: u64,

    /// Number of assets that get a 24h statistics lookup
    #[serde(default = "default_stats_top_n")]
    pub stats_top_n: usize,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: default_exchange_base_url(),
            request_timeout_secs: default_exchange_request_timeout(),
            stats_top_n: default_stats_top_n(),
        }
    }
}

fn default_exchange_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_exchange_request_timeout() -> u64 {
    10
}

fn default_stats_top_n() -> usize {
    10
}

/// AI provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// Timeout for one provider request (seconds)
    #[serde(default = "default_ai_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Provider id -> base URL override (proxies, self-hosted gateways)
    #[serde(default)]
    pub base_urls: HashMap<String, String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_ai_request_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            base_urls: HashMap::new(),
        }
    }
}

fn default_ai_request_timeout() -> u64 {
    90
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.7
}

/// Per-step timeout and retry budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSettings {
    #[serde(default = "default_price_timeout")]
    pub price_timeout_secs: u64,

    #[serde(default = "default_price_retries")]
    pub price_retries: u32,

    #[serde(default = "default_ai_timeout")]
    pub ai_timeout_secs: u64,

    #[serde(default = "default_ai_retries")]
    pub ai_retries: u32,

    /// Timeout for the CPU-bound transform steps
    #[serde(default = "default_transform_timeout")]
    pub transform_timeout_secs: u64,

    /// Base delay of the exponential retry backoff (milliseconds)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            price_timeout_secs: default_price_timeout(),
            price_retries: default_price_retries(),
            ai_timeout_secs: default_ai_timeout(),
            ai_retries: default_ai_retries(),
            transform_timeout_secs: default_transform_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_price_timeout() -> u64 {
    15
}

fn default_price_retries() -> u32 {
    2
}

fn default_ai_timeout() -> u64 {
    120
}

fn default_ai_retries() -> u32 {
    1
}

fn default_transform_timeout() -> u64 {
    5
}

fn default_retry_backoff() -> u64 {
    500
}

/// Market analysis thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Minimum 24h quote volume for the high-volume list
    #[serde(default = "default_high_volume_threshold")]
    pub high_volume_threshold: Decimal,

    /// Number of gainers and of losers reported
    #[serde(default = "default_top_movers")]
    pub top_movers: usize,

    /// Fraction of the 24h range counted as "near" support or resistance
    #[serde(default = "default_range_proximity")]
    pub range_proximity: Decimal,

    /// Maximum risk per trade as a fraction of per-trade capital
    #[serde(default = "default_risk_ceiling")]
    pub risk_ceiling: Decimal,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            high_volume_threshold: default_high_volume_threshold(),
            top_movers: default_top_movers(),
            range_proximity: default_range_proximity(),
            risk_ceiling: default_risk_ceiling(),
        }
    }
}

fn default_high_volume_threshold() -> Decimal {
    Decimal::from(10_000_000)
}

fn default_top_movers() -> usize {
    3
}

fn default_range_proximity() -> Decimal {
    Decimal::new(2, 1)
}

fn default_risk_ceiling() -> Decimal {
    Decimal::new(2, 2)
}

/// Thresholds shared by the prompt contract and the validator chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_max_ipe")]
    pub max_ipe: Decimal,

    /// Maximum distance between entry and current price (percent)
    #[serde(default = "default_max_entry_deviation")]
    pub max_entry_deviation_pct: Decimal,

    #[serde(default = "default_min_criteria")]
    pub min_criteria: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_ipe: default_max_ipe(),
            max_entry_deviation_pct: default_max_entry_deviation(),
            min_criteria: default_min_criteria(),
        }
    }
}

fn default_max_ipe() -> Decimal {
    Decimal::from(95)
}

fn default_max_entry_deviation() -> Decimal {
    Decimal::TWO
}

fn default_min_criteria() -> usize {
    3
}

/// Load settings from a TOML file
pub fn load_settings(path: impl AsRef<Path>) -> anyhow::Result<PipelineSettings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: PipelineSettings = toml::from_str(&content)
        .with_context(|| format!("invalid settings file {}", path.display()))?;
    Ok(settings)
}

/// Save settings to a TOML file
pub fn save_settings(settings: &PipelineSettings, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
