// Trading Context
// Turns a price map and the run configuration into market analysis,
// position sizing and execution parameters. Pure, no I/O.

use common::{
    AnalysisSettings, ExecutionTime, InputError, PriceMap, RunConfig, ValidationSettings,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ranked 24h mover
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mover {
    pub symbol: String,
    pub price: Decimal,
    pub change_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeLeader {
    pub symbol: String,
    pub quote_volume: Decimal,
}

/// An asset trading near one end of its 24h range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RangeLevel {
    pub symbol: String,
    pub price: Decimal,
    pub low: Decimal,
    pub high: Decimal,
    /// 0 = at the 24h low, 1 = at the 24h high
    pub range_position: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub top_gainers: Vec<Mover>,
    pub top_losers: Vec<Mover>,
    pub high_volume: Vec<VolumeLeader>,
    pub near_support: Vec<RangeLevel>,
    pub near_resistance: Vec<RangeLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionSizing {
    pub total_capital: Decimal,
    pub num_trades: u32,
    pub capital_per_trade: Decimal,
    pub leverage: Decimal,
    /// Notional exposure per trade after leverage
    pub effective_position: Decimal,
    /// Maximum loss per trade in quote currency
    pub max_risk_per_trade: Decimal,
    pub risk_ceiling_pct: Decimal,
}

/// Per execution-time class guidance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionParams {
    pub execution_time: ExecutionTime,
    pub max_duration_hours: u32,
    pub min_risk_reward: Decimal,
    pub leverage_min: Decimal,
    pub leverage_max: Decimal,
    pub target_pct: Option<Decimal>,
    pub description: String,
}

impl ExecutionParams {
    pub fn for_class(execution_time: ExecutionTime, target_pct: Option<Decimal>) -> Self {
        // min risk/reward in tenths
        let (max_duration_hours, min_rr_tenths, leverage_min, leverage_max, description) =
            match execution_time {
                ExecutionTime::Target => (720, 20, 1, 10, "hold until the profit target is reached"),
                ExecutionTime::Scalping => (1, 15, 5, 20, "very short-term, minutes to one hour"),
                ExecutionTime::Intraday => (24, 20, 2, 10, "opened and closed within the same day"),
                ExecutionTime::Swing => (168, 25, 1, 5, "multi-day position, up to one week"),
            };

        Self {
            execution_time,
            max_duration_hours,
            min_risk_reward: Decimal::new(min_rr_tenths, 1).normalize(),
            leverage_min: Decimal::from(leverage_min),
            leverage_max: Decimal::from(leverage_max),
            target_pct: match execution_time {
                ExecutionTime::Target => target_pct,
                _ => None,
            },
            description: description.to_string(),
        }
    }

    pub fn leverage_in_band(&self, leverage: Decimal) -> bool {
        leverage >= self.leverage_min && leverage <= self.leverage_max
    }
}

/// Hard limits stated to the AI and enforced by the validator chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeConstraints {
    pub min_ipe: Decimal,
    pub max_ipe: Decimal,
    pub min_risk_reward: Decimal,
    pub max_entry_deviation_pct: Decimal,
    pub min_criteria: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricesSummary {
    pub total_assets: usize,
    pub with_stats: usize,
    pub average_change_percent: Option<Decimal>,
    pub advancing: usize,
    pub declining: usize,
}

/// Everything downstream steps need to know about the market and the run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradingContext {
    pub prices: PriceMap,
    pub market_analysis: MarketAnalysis,
    pub position_sizing: PositionSizing,
    pub execution_params: ExecutionParams,
    pub constraints: TradeConstraints,
    pub prices_summary: PricesSummary,
    pub num_results: u32,
}

/// Builds the [`TradingContext`] for one run
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    analysis: AnalysisSettings,
    validation: ValidationSettings,
}

impl ContextBuilder {
    pub fn new(analysis: AnalysisSettings, validation: ValidationSettings) -> Self {
        Self {
            analysis,
            validation,
        }
    }

    /// Check a run configuration against the configured IPE ceiling
    pub fn validate_config(&self, config: &RunConfig) -> Result<(), InputError> {
        config.validate(self.validation.max_ipe)
    }

    pub fn build(&self, prices: &PriceMap, config: &RunConfig) -> Result<TradingContext, InputError> {
        self.validate_config(config)?;

        let execution_params = ExecutionParams::for_class(config.execution_time, config.target_pct);
        let constraints = TradeConstraints {
            min_ipe: config.min_ipe,
            max_ipe: self.validation.max_ipe,
            min_risk_reward: execution_params.min_risk_reward,
            max_entry_deviation_pct: self.validation.max_entry_deviation_pct,
            min_criteria: self.validation.min_criteria,
        };

        Ok(TradingContext {
            prices: prices.clone(),
            market_analysis: self.analyze(prices),
            position_sizing: self.size_positions(config),
            execution_params,
            constraints,
            prices_summary: summarize(prices),
            num_results: config.num_results,
        })
    }

    fn analyze(&self, prices: &PriceMap) -> MarketAnalysis {
        let movers: Vec<Mover> = prices
            .values()
            .filter_map(|q| {
                q.change_percent_24h.map(|change| Mover {
                    symbol: q.symbol.clone(),
                    price: q.price,
                    change_percent: change,
                })
            })
            .collect();

        let mut gainers: Vec<Mover> = movers.iter().filter(|m| m.change_percent > Decimal::ZERO).cloned().collect();
        gainers.sort_by(|a, b| {
            b.change_percent
                .cmp(&a.change_percent)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        gainers.truncate(self.analysis.top_movers);

        let mut losers: Vec<Mover> = movers.into_iter().filter(|m| m.change_percent < Decimal::ZERO).collect();
        losers.sort_by(|a, b| {
            a.change_percent
                .cmp(&b.change_percent)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        losers.truncate(self.analysis.top_movers);

        let mut high_volume: Vec<VolumeLeader> = prices
            .values()
            .filter_map(|q| {
                q.quote_volume_24h
                    .filter(|v| *v > self.analysis.high_volume_threshold)
                    .map(|v| VolumeLeader {
                        symbol: q.symbol.clone(),
                        quote_volume: v,
                    })
            })
            .collect();
        high_volume.sort_by(|a, b| {
            b.quote_volume
                .cmp(&a.quote_volume)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let proximity = self.analysis.range_proximity;
        let mut near_support = Vec::new();
        let mut near_resistance = Vec::new();
        for quote in prices.values() {
            let (Some(position), Some(low), Some(high)) =
                (quote.range_position(), quote.low_24h, quote.high_24h)
            else {
                continue;
            };
            let level = RangeLevel {
                symbol: quote.symbol.clone(),
                price: quote.price,
                low,
                high,
                range_position: position.round_dp(2),
            };
            if position <= proximity {
                near_support.push(level);
            } else if position >= Decimal::ONE - proximity {
                near_resistance.push(level);
            }
        }

        MarketAnalysis {
            top_gainers: gainers,
            top_losers: losers,
            high_volume,
            near_support,
            near_resistance,
        }
    }

    fn size_positions(&self, config: &RunConfig) -> PositionSizing {
        let capital_per_trade = config.capital / Decimal::from(config.num_results);
        PositionSizing {
            total_capital: config.capital,
            num_trades: config.num_results,
            capital_per_trade: capital_per_trade.round_dp(2),
            leverage: config.leverage,
            effective_position: (capital_per_trade * config.leverage).round_dp(2),
            max_risk_per_trade: (capital_per_trade * self.analysis.risk_ceiling).round_dp(2),
            risk_ceiling_pct: (self.analysis.risk_ceiling * Decimal::ONE_HUNDRED).normalize(),
        }
    }
}

fn summarize(prices: &PriceMap) -> PricesSummary {
    let changes: Vec<Decimal> = prices.values().filter_map(|q| q.change_percent_24h).collect();
    let average_change_percent = if changes.is_empty() {
        None
    } else {
        let total: Decimal = changes.iter().sum();
        Some((total / Decimal::from(changes.len())).round_dp(2))
    };

    PricesSummary {
        total_assets: prices.len(),
        with_stats: prices.values().filter(|q| q.has_stats()).count(),
        average_change_percent,
        advancing: changes.iter().filter(|c| **c > Decimal::ZERO).count(),
        declining: changes.iter().filter(|c| **c < Decimal::ZERO).count(),
    }
}
