// Trade signal model
// Canonical trade records built from AI output plus their validation state

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Accepts LONG/SHORT and the BUY/SELL synonyms, case-insensitive
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "LONG" | "BUY" => Some(Direction::Long),
            "SHORT" | "SELL" => Some(Direction::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status handed to the consumer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Pending,
    Invalid,
}

/// The AI's reasoning fields, kept literally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct TradeReasoning(pub Map<String, Value>);

impl TradeReasoning {
    pub fn from_summary(summary: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("summary".to_string(), Value::String(summary.into()));
        Self(map)
    }

    pub fn summary(&self) -> Option<&str> {
        self.0.get("summary").and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One weighted factor in the AI's confidence breakdown
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceFactor {
    pub factor: String,
    /// Percentage weight; the weights of a trade should sum to 100
    pub weight: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Severity of a validator; only errors exclude a trade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Threshold a validator compared against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Threshold {
    Min { min: Decimal },
    Max { max: Decimal },
    Range { min: Decimal, max: Decimal },
    None,
}

/// Outcome of one validator on one trade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub validator: String,
    pub passed: bool,
    pub message: String,
    pub value: Option<Decimal>,
    pub threshold: Threshold,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        !self.passed && self.severity == Severity::Warning
    }
}

/// All validator results for a trade. `passed` is the AND of the error-severity results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub passed: bool,
    pub results: Vec<ValidationResult>,
}

impl ValidationOutcome {
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let passed = results.iter().all(|r| !r.is_blocking());
        Self { passed, results }
    }

    pub fn failures(&self) -> Vec<ValidationResult> {
        self.results.iter().filter(|r| r.is_blocking()).cloned().collect()
    }

    pub fn warnings(&self) -> Vec<ValidationResult> {
        self.results.iter().filter(|r| r.is_warning()).cloned().collect()
    }
}

/// Canonical trade record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTrade {
    pub id: Uuid,
    pub strategy_id: String,
    pub strategy_name: String,
    pub asset: String,
    pub direction: Direction,
    pub entry: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    /// Derived from entry/TP/SL, never taken from the AI. Rounded to 2 decimals.
    pub risk_reward_ratio: Decimal,
    pub risk_percent: Decimal,
    pub reward_percent: Decimal,
    pub ipe: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<Decimal>,
    pub reasoning: TradeReasoning,
    pub criteria: Vec<String>,
    pub confidence_factors: Vec<ConfidenceFactor>,
    pub status: TradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
    /// Element as emitted by the AI
    pub raw: Value,
}

impl NormalizedTrade {
    pub fn confidence_weight_total(&self) -> Decimal {
        self.confidence_factors.iter().map(|f| f.weight).sum()
    }

    /// Unrounded metrics recomputed from the trade's own prices
    pub fn exact_metrics(&self) -> RiskMetrics {
        RiskMetrics::compute(self.entry, self.take_profit, self.stop_loss)
    }
}

/// A trade excluded by at least one error-severity validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvalidTrade {
    pub trade: NormalizedTrade,
    pub failed_validations: Vec<ValidationResult>,
}

/// Advisory results recorded for a trade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeWarnings {
    pub trade_id: Uuid,
    pub asset: String,
    pub warnings: Vec<ValidationResult>,
}

/// Derived risk figures for a price triple
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskMetrics {
    pub risk_reward_ratio: Decimal,
    pub risk_percent: Decimal,
    pub reward_percent: Decimal,
}

impl RiskMetrics {
    /// Computed exactly from absolute distances to entry.
    /// Ordering against direction is checked separately.
    pub fn compute(entry: Decimal, take_profit: Decimal, stop_loss: Decimal) -> Self {
        let reward = (take_profit - entry).abs();
        let risk = (entry - stop_loss).abs();
        let ratio = reward.checked_div(risk).unwrap_or(Decimal::ZERO);
        let pct = |distance: Decimal| {
            if entry > Decimal::ZERO {
                distance / entry * Decimal::ONE_HUNDRED
            } else {
                Decimal::ZERO
            }
        };

        Self {
            risk_reward_ratio: ratio,
            risk_percent: pct(risk),
            reward_percent: pct(reward),
        }
    }

    /// Two-decimal figures for display on the trade record
    pub fn rounded(&self) -> Self {
        Self {
            risk_reward_ratio: self.risk_reward_ratio.round_dp(2),
            risk_percent: self.risk_percent.round_dp(2),
            reward_percent: self.reward_percent.round_dp(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_synonyms() {
        assert_eq!(Direction::parse("long"), Some(Direction::Long));
        assert_eq!(Direction::parse(" BUY "), Some(Direction::Long));
        assert_eq!(Direction::parse("Sell"), Some(Direction::Short));
        assert_eq!(Direction::parse("Momentum"), None);
    }

    #[test]
    fn test_risk_metrics() {
        let metrics = RiskMetrics::compute(dec!(95000), dec!(100000), dec!(92000)).rounded();
        assert_eq!(metrics.risk_reward_ratio, dec!(1.67));
        assert_eq!(metrics.risk_percent, dec!(3.16));
        assert_eq!(metrics.reward_percent, dec!(5.26));

        let metrics = RiskMetrics::compute(dec!(95000), dec!(105000), dec!(90000));
        assert_eq!(metrics.risk_reward_ratio, dec!(2));

        // zero risk distance does not divide by zero
        let metrics = RiskMetrics::compute(dec!(100), dec!(110), dec!(100));
        assert_eq!(metrics.risk_reward_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_ratio_is_kept_unrounded() {
        let metrics = RiskMetrics::compute(dec!(95000), dec!(96896), dec!(94050));
        assert!(metrics.risk_reward_ratio < dec!(2));
        assert!(metrics.risk_reward_ratio > dec!(1.9957));
        assert_eq!(metrics.rounded().risk_reward_ratio, dec!(2.00));
    }

    #[test]
    fn test_weight_total_is_exact() {
        let factor = |weight| ConfidenceFactor {
            factor: "f".to_string(),
            weight,
            score: None,
            description: None,
        };
        let mut trade = crate::test_support::trade("BTC/USDT", dec!(95000), dec!(105000), dec!(90000), dec!(85));
        trade.confidence_factors = vec![factor(dec!(33.3)), factor(dec!(33.3)), factor(dec!(33.4))];
        assert_eq!(trade.confidence_weight_total(), dec!(100));
    }

    #[test]
    fn test_outcome_ignores_warnings() {
        let result = |severity, passed| ValidationResult {
            validator: "v".to_string(),
            passed,
            message: String::new(),
            value: None,
            threshold: Threshold::None,
            severity,
        };

        let outcome = ValidationOutcome::from_results(vec![
            result(Severity::Error, true),
            result(Severity::Warning, false),
        ]);
        assert!(outcome.passed);
        assert_eq!(outcome.warnings().len(), 1);

        let outcome = ValidationOutcome::from_results(vec![result(Severity::Error, false)]);
        assert!(!outcome.passed);
        assert_eq!(outcome.failures().len(), 1);
    }
}
