// Shared test fixtures

use std::collections::HashMap;

use ai_providers::{Completion, Usage};
use common::{ExecutionTime, PriceMap, PriceQuote, RunConfig, Strategy};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use uuid::Uuid;

use crate::context::{ContextBuilder, TradingContext};
use crate::signals::{ConfidenceFactor, Direction, NormalizedTrade, RiskMetrics, TradeReasoning, TradeStatus};

pub fn price_map(quotes: &[(&str, Decimal)]) -> PriceMap {
    quotes
        .iter()
        .map(|(symbol, price)| (symbol.to_string(), PriceQuote::new(*symbol, *price)))
        .collect()
}

/// $1000 at 5x, one trade, 10% target, keyed for the "fake" provider
pub fn run_config() -> RunConfig {
    RunConfig {
        capital: dec!(1000),
        leverage: dec!(5),
        num_results: 1,
        execution_time: ExecutionTime::Target,
        target_pct: Some(dec!(10)),
        min_ipe: dec!(70),
        ai_provider: "fake".to_string(),
        ai_model: None,
        api_keys: HashMap::from([("fake".to_string(), "test-key".to_string())]),
        assets: Some(vec!["BTC/USDT".to_string()]),
    }
}

pub fn strategy() -> Strategy {
    Strategy {
        id: "strat-momentum".to_string(),
        name: "Momentum breakout".to_string(),
        content: "Buy assets breaking above their 24h high on rising volume. \
                  Stop below the breakout candle."
            .to_string(),
    }
}

/// Context with BTC/USDT at 95000 and no 24h statistics
pub fn scenario_context() -> TradingContext {
    ContextBuilder::default()
        .build(&price_map(&[("BTC/USDT", dec!(95000))]), &run_config())
        .unwrap()
}

/// A LONG trade with three criteria and weights summing to 100
pub fn trade(asset: &str, entry: Decimal, take_profit: Decimal, stop_loss: Decimal, ipe: Decimal) -> NormalizedTrade {
    let metrics = RiskMetrics::compute(entry, take_profit, stop_loss).rounded();
    let key = format!("{}:{}:{}:{}", asset, entry, take_profit, stop_loss);

    NormalizedTrade {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()),
        strategy_id: "strat-momentum".to_string(),
        strategy_name: "Momentum breakout".to_string(),
        asset: asset.to_string(),
        direction: Direction::Long,
        entry,
        take_profit,
        stop_loss,
        risk_reward_ratio: metrics.risk_reward_ratio,
        risk_percent: metrics.risk_percent,
        reward_percent: metrics.reward_percent,
        ipe,
        leverage: None,
        reasoning: TradeReasoning::from_summary("Breakout above the 24h high"),
        criteria: vec![
            "breakout above 24h high".to_string(),
            "volume above average".to_string(),
            "higher lows".to_string(),
        ],
        confidence_factors: vec![
            ConfidenceFactor {
                factor: "trend".to_string(),
                weight: dec!(60),
                score: Some(dec!(80)),
                description: None,
            },
            ConfidenceFactor {
                factor: "volume".to_string(),
                weight: dec!(40),
                score: None,
                description: None,
            },
        ],
        status: TradeStatus::Pending,
        validation: None,
        raw: Value::Null,
    }
}

pub fn completion(content: &str) -> Completion {
    Completion {
        content: content.to_string(),
        usage: Usage::new(100, 50),
        provider: "fake".to_string(),
        model: "fake-1".to_string(),
        finish_reason: Some("stop".to_string()),
        latency_ms: 12,
        raw: Value::Null,
    }
}
