// Trade Validators
// Independent checks run against every normalized trade

use std::panic::{catch_unwind, AssertUnwindSafe};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::TradingContext;
use crate::signals::{
    InvalidTrade, NormalizedTrade, Severity, Threshold, TradeStatus, TradeWarnings, ValidationOutcome,
    ValidationResult,
};

/// What a single check observed
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub passed: bool,
    pub message: String,
    pub value: Option<Decimal>,
    pub threshold: Threshold,
}

impl Check {
    pub fn new(passed: bool, message: impl Into<String>, value: Option<Decimal>, threshold: Threshold) -> Self {
        Self {
            passed,
            message: message.into(),
            value,
            threshold,
        }
    }
}

/// Trait for trade validators
pub trait TradeValidator: Send + Sync {
    fn name(&self) -> &str;

    fn severity(&self) -> Severity;

    fn check(&self, trade: &NormalizedTrade, context: &TradingContext) -> anyhow::Result<Check>;
}

/// Risk/reward must reach the execution class minimum. The unrounded
/// ratio is compared; the trade's stored ratio is display only.
pub struct RiskRewardValidator;

impl TradeValidator for RiskRewardValidator {
    fn name(&self) -> &str {
        "risk_reward"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, trade: &NormalizedTrade, context: &TradingContext) -> anyhow::Result<Check> {
        let min = context.constraints.min_risk_reward;
        let ratio = trade.exact_metrics().risk_reward_ratio;
        Ok(Check::new(
            ratio >= min,
            format!("risk/reward {} vs minimum {}", ratio.round_dp(4), min),
            Some(ratio),
            Threshold::Min { min },
        ))
    }
}

/// LONG: TP > entry > SL. SHORT: TP < entry < SL.
pub struct PriceOrderingValidator;

impl TradeValidator for PriceOrderingValidator {
    fn name(&self) -> &str {
        "price_ordering"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, trade: &NormalizedTrade, _context: &TradingContext) -> anyhow::Result<Check> {
        use crate::signals::Direction;

        let (passed, expected) = match trade.direction {
            Direction::Long => (
                trade.take_profit > trade.entry && trade.entry > trade.stop_loss,
                "takeProfit > entry > stopLoss",
            ),
            Direction::Short => (
                trade.take_profit < trade.entry && trade.entry < trade.stop_loss,
                "takeProfit < entry < stopLoss",
            ),
        };
        let message = if passed {
            format!("{} levels ordered correctly", trade.direction)
        } else {
            format!(
                "{} requires {} (tp {}, entry {}, sl {})",
                trade.direction, expected, trade.take_profit, trade.entry, trade.stop_loss
            )
        };
        Ok(Check::new(passed, message, None, Threshold::None))
    }
}

/// IPE inside [minIpe, maxIpe]
pub struct IpeRangeValidator;

impl TradeValidator for IpeRangeValidator {
    fn name(&self) -> &str {
        "ipe_range"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn check(&self, trade: &NormalizedTrade, context: &TradingContext) -> anyhow::Result<Check> {
        let (min, max) = (context.constraints.min_ipe, context.constraints.max_ipe);
        let passed = trade.ipe >= min && trade.ipe <= max;
        Ok(Check::new(
            passed,
            format!("IPE {} vs range [{}, {}]", trade.ipe, min, max),
            Some(trade.ipe),
            Threshold::Range { min, max },
        ))
    }
}

/// Leverage inside the suggested band of the execution class.
/// Trades without their own leverage are checked at the run leverage.
pub struct LeverageBandValidator;

impl TradeValidator for LeverageBandValidator {
    fn name(&self) -> &str {
        "leverage_band"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, trade: &NormalizedTrade, context: &TradingContext) -> anyhow::Result<Check> {
        let params = &context.execution_params;
        let leverage = trade.leverage.unwrap_or(context.position_sizing.leverage);
        Ok(Check::new(
            params.leverage_in_band(leverage),
            format!(
                "leverage {}x vs {} band {}x-{}x",
                leverage, params.execution_time, params.leverage_min, params.leverage_max
            ),
            Some(leverage),
            Threshold::Range {
                min: params.leverage_min,
                max: params.leverage_max,
            },
        ))
    }
}

/// Entry close to the current market price; passes when no price is known
pub struct EntryDeviationValidator;

impl TradeValidator for EntryDeviationValidator {
    fn name(&self) -> &str {
        "entry_deviation"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, trade: &NormalizedTrade, context: &TradingContext) -> anyhow::Result<Check> {
        let max = context.constraints.max_entry_deviation_pct;
        let current = context
            .prices
            .get(&trade.asset)
            .map(|q| q.price)
            .filter(|p| *p > Decimal::ZERO);

        let Some(current) = current else {
            return Ok(Check::new(
                true,
                format!("no current price for {}, deviation not checked", trade.asset),
                None,
                Threshold::Max { max },
            ));
        };

        let deviation = (trade.entry - current).abs() / current * Decimal::ONE_HUNDRED;
        Ok(Check::new(
            deviation <= max,
            format!("entry {} is {}% from market {}", trade.entry, deviation.round_dp(2), current),
            Some(deviation),
            Threshold::Max { max },
        ))
    }
}

/// Confidence-factor weights sum to 100
pub struct ConfidenceWeightsValidator;


impl TradeValidator for ConfidenceWeightsValidator {
    fn name(&self) -> &str {
        "confidence_weights"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, trade: &NormalizedTrade, _context: &TradingContext) -> anyhow::Result<Check> {
        let total = trade.confidence_weight_total();
        let tolerance = Decimal::new(5, 1);
        Ok(Check::new(
            (total - Decimal::ONE_HUNDRED).abs() <= tolerance,
            format!(
                "{} confidence factor(s) with total weight {}",
                trade.confidence_factors.len(),
                total
            ),
            Some(total),
            Threshold::Range {
                min: Decimal::ONE_HUNDRED - tolerance,
                max: Decimal::ONE_HUNDRED + tolerance,
            },
        ))
    }
}

pub struct CriteriaCountValidator;

impl TradeValidator for CriteriaCountValidator {
    fn name(&self) -> &str {
        "criteria_count"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, trade: &NormalizedTrade, context: &TradingContext) -> anyhow::Result<Check> {
        let min = context.constraints.min_criteria;
        let count = trade.criteria.len();
        Ok(Check::new(
            count >= min,
            format!("{} matched criteria vs minimum {}", count, min),
            Some(Decimal::from(count)),
            Threshold::Min { min: Decimal::from(min) },
        ))
    }
}

/// Valid and invalid trades of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchValidation {
    pub valid: Vec<NormalizedTrade>,
    pub invalid: Vec<InvalidTrade>,
    pub warnings: Vec<TradeWarnings>,
}

/// Ordered collection of validators. Order only affects the order of results.
pub struct ValidatorChain {
    validators: Vec<Box<dyn TradeValidator>>,
}

impl Default for ValidatorChain {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    /// Required checks followed by the advisory ones
    pub fn with_defaults() -> Self {
        Self::new()
            .add(Box::new(RiskRewardValidator))
            .add(Box::new(PriceOrderingValidator))
            .add(Box::new(IpeRangeValidator))
            .add(Box::new(LeverageBandValidator))
            .add(Box::new(EntryDeviationValidator))
            .add(Box::new(ConfidenceWeightsValidator))
            .add(Box::new(CriteriaCountValidator))
    }

    pub fn add(mut self, validator: Box<dyn TradeValidator>) -> Self {
        debug!("Adding trade validator: {}", validator.name());
        self.validators.push(validator);
        self
    }

    /// Removes every validator with this name; returns whether any was removed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.validators.len();
        self.validators.retain(|v| v.name() != name);
        before != self.validators.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every validator against one trade. A validator that errors or
    /// panics yields a failed error-severity result for this trade only.
    pub fn validate(&self, trade: &NormalizedTrade, context: &TradingContext) -> ValidationOutcome {
        let results = self
            .validators
            .iter()
            .map(|validator| {
                let outcome = catch_unwind(AssertUnwindSafe(|| validator.check(trade, context)));
                match outcome {
                    Ok(Ok(check)) => ValidationResult {
                        validator: validator.name().to_string(),
                        passed: check.passed,
                        message: check.message,
                        value: check.value,
                        threshold: check.threshold,
                        severity: validator.severity(),
                    },
                    Ok(Err(e)) => crashed(validator.name(), trade, e.to_string()),
                    Err(panic) => crashed(validator.name(), trade, panic_message(panic.as_ref())),
                }
            })
            .collect();

        ValidationOutcome::from_results(results)
    }

    /// Validate a batch, splitting it into valid and invalid trades.
    /// Each trade is decorated with its validation outcome.
    pub fn validate_batch(&self, trades: Vec<NormalizedTrade>, context: &TradingContext) -> BatchValidation {
        let mut batch = BatchValidation::default();

        for mut trade in trades {
            let outcome = self.validate(&trade, context);
            let warnings = outcome.warnings();
            if !warnings.is_empty() {
                batch.warnings.push(TradeWarnings {
                    trade_id: trade.id,
                    asset: trade.asset.clone(),
                    warnings,
                });
            }

            if outcome.passed {
                trade.status = TradeStatus::Pending;
                trade.validation = Some(outcome);
                batch.valid.push(trade);
            } else {
                let failed_validations = outcome.failures();
                debug!(
                    trade_id = %trade.id,
                    asset = %trade.asset,
                    failed = ?failed_validations.iter().map(|r| r.validator.as_str()).collect::<Vec<_>>(),
                    "Trade rejected by validators"
                );
                trade.status = TradeStatus::Invalid;
                trade.validation = Some(outcome);
                batch.invalid.push(InvalidTrade {
                    trade,
                    failed_validations,
                });
            }
        }

        batch
    }
}

fn crashed(name: &str, trade: &NormalizedTrade, reason: String) -> ValidationResult {
    warn!(validator = name, trade_id = %trade.id, "Validator failed: {}", reason);
    ValidationResult {
        validator: name.to_string(),
        passed: false,
        message: format!("validator error: {}", reason),
        value: None,
        threshold: Threshold::None,
        severity: Severity::Error,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "validator panicked".to_string()
    }
}
