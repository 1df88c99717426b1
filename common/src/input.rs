//! Pipeline input as supplied by the consumer layer

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Free-text trading strategy written by the user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// Execution-time class of the requested trades
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTime {
    /// Hold until the profit target is hit
    Target,
    Scalping,
    Intraday,
    Swing,
}

impl ExecutionTime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionTime::Target => "target",
            ExecutionTime::Scalping => "scalping",
            ExecutionTime::Intraday => "intraday",
            ExecutionTime::Swing => "swing",
        }
    }
}

impl fmt::Display for ExecutionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionTime {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "target" => Ok(ExecutionTime::Target),
            "scalping" => Ok(ExecutionTime::Scalping),
            "intraday" => Ok(ExecutionTime::Intraday),
            "swing" => Ok(ExecutionTime::Swing),
            other => Err(InputError::UnknownExecutionTime(other.to_string())),
        }
    }
}

/// Run configuration supplied alongside the strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Total capital available for the generated trades (quote currency)
    pub capital: Decimal,
    pub leverage: Decimal,
    /// Number of trades requested from the AI
    pub num_results: u32,
    pub execution_time: ExecutionTime,
    /// Profit target in percent, used by the `target` execution class
    #[serde(default)]
    pub target_pct: Option<Decimal>,
    #[serde(default = "default_min_ipe")]
    pub min_ipe: Decimal,
    pub ai_provider: String,
    #[serde(default)]
    pub ai_model: Option<String>,
    /// Provider id -> API key
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
    /// Assets in `BASE/QUOTE` form; the default asset list is used when absent
    #[serde(default)]
    pub assets: Option<Vec<String>>,
}

fn default_min_ipe() -> Decimal {
    Decimal::from(70)
}

impl RunConfig {
    /// API key for the configured provider, if present and non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_keys
            .get(&self.ai_provider)
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
    }

    /// Model override, if present and non-blank
    pub fn model(&self) -> Option<&str> {
        self.ai_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Check the run configuration. `max_ipe` is the upper bound of the
    /// accepted IPE range; a `minIpe` above it would reject every trade.
    pub fn validate(&self, max_ipe: Decimal) -> Result<(), InputError> {
        if self.capital <= Decimal::ZERO {
            return Err(InputError::InvalidCapital(self.capital));
        }
        if self.leverage < Decimal::ONE {
            return Err(InputError::InvalidLeverage(self.leverage));
        }
        if self.num_results == 0 {
            return Err(InputError::NoResultsRequested);
        }
        if self.min_ipe < Decimal::ZERO || self.min_ipe > Decimal::ONE_HUNDRED {
            return Err(InputError::InvalidMinIpe(self.min_ipe));
        }
        if self.min_ipe > max_ipe {
            return Err(InputError::MinIpeAboveMax {
                min_ipe: self.min_ipe,
                max_ipe,
            });
        }
        if let Some(target) = self.target_pct {
            if target <= Decimal::ZERO {
                return Err(InputError::InvalidTargetPct(target));
            }
        }
        Ok(())
    }
}

/// Everything one pipeline run needs from the consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    pub strategy: Strategy,
    pub config: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("capital must be a positive amount, got {0}")]
    InvalidCapital(Decimal),

    #[error("leverage must be at least 1, got {0}")]
    InvalidLeverage(Decimal),

    #[error("numResults must be at least 1")]
    NoResultsRequested,

    #[error("minIpe must be within 0..=100, got {0}")]
    InvalidMinIpe(Decimal),

    #[error("minIpe {min_ipe} is above the maximum IPE {max_ipe}, no trade could pass")]
    MinIpeAboveMax { min_ipe: Decimal, max_ipe: Decimal },

    #[error("targetPct must be a positive percentage, got {0}")]
    InvalidTargetPct(Decimal),

    #[error("unknown execution time class: {0}")]
    UnknownExecutionTime(String),
}
