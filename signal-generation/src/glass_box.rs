// Glass Box
// Immutable audit records explaining why each accepted trade was produced

use std::collections::BTreeMap;

use ai_providers::{Completion, Usage};
use chrono::{DateTime, Utc};
use common::{PriceQuote, Strategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{ExecutionParams, PositionSizing, TradeConstraints, TradingContext};
use crate::parser::ParseIssue;
use crate::prompt::ComposedPrompt;
use crate::signals::{ConfidenceFactor, Direction, NormalizedTrade, TradeReasoning, ValidationResult};
use crate::validators::BatchValidation;

/// Audit bundle for one accepted trade. Fields are private and there are
/// no setters: a record cannot change after it is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlassBoxRecord {
    trade_id: Uuid,
    asset: String,
    direction: Direction,
    strategy_id: String,
    strategy_name: String,
    reasoning: TradeReasoning,
    criteria: Vec<String>,
    confidence_factors: Vec<ConfidenceFactor>,
    validation_results: Vec<ValidationResult>,
    market_snapshot: Option<PriceQuote>,
    execution_params: ExecutionParams,
    position_sizing: PositionSizing,
    constraints: TradeConstraints,
    /// UUID v5 of the full prompt text kept in [`DecisionContext`]
    prompt_fingerprint: Uuid,
    /// The trade element exactly as the AI returned it
    raw_candidate: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl GlassBoxRecord {
    fn new(trade: &NormalizedTrade, context: &TradingContext, prompt_fingerprint: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            trade_id: trade.id,
            asset: trade.asset.clone(),
            direction: trade.direction,
            strategy_id: trade.strategy_id.clone(),
            strategy_name: trade.strategy_name.clone(),
            reasoning: trade.reasoning.clone(),
            criteria: trade.criteria.clone(),
            confidence_factors: trade.confidence_factors.clone(),
            validation_results: trade
                .validation
                .as_ref()
                .map(|v| v.results.clone())
                .unwrap_or_default(),
            market_snapshot: context.prices.get(&trade.asset).cloned(),
            execution_params: context.execution_params.clone(),
            position_sizing: context.position_sizing.clone(),
            constraints: context.constraints.clone(),
            prompt_fingerprint,
            raw_candidate: trade.raw.clone(),
            created_at,
        }
    }

    pub fn trade_id(&self) -> Uuid {
        self.trade_id
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn reasoning(&self) -> &TradeReasoning {
        &self.reasoning
    }

    pub fn criteria(&self) -> &[String] {
        &self.criteria
    }

    pub fn confidence_factors(&self) -> &[ConfidenceFactor] {
        &self.confidence_factors
    }

    pub fn validation_results(&self) -> &[ValidationResult] {
        &self.validation_results
    }

    pub fn market_snapshot(&self) -> Option<&PriceQuote> {
        self.market_snapshot.as_ref()
    }

    pub fn execution_params(&self) -> &ExecutionParams {
        &self.execution_params
    }

    pub fn position_sizing(&self) -> &PositionSizing {
        &self.position_sizing
    }

    pub fn constraints(&self) -> &TradeConstraints {
        &self.constraints
    }

    pub fn prompt_fingerprint(&self) -> Uuid {
        self.prompt_fingerprint
    }

    pub fn raw_candidate(&self) -> &serde_json::Value {
        &self.raw_candidate
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Prompt and response text shared by every record of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionContext {
    pub prompt_fingerprint: Uuid,
    pub system_prompt: String,
    pub user_prompt: String,
    pub response_content: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorTally {
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeTally {
    pub trade_id: Uuid,
    pub asset: String,
    pub valid: bool,
    pub checks_passed: usize,
    pub checks_failed: usize,
}

/// Run-level audit summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub execution_id: Uuid,
    pub strategy_id: String,
    pub strategy_name: String,
    pub generated: usize,
    pub valid: usize,
    pub invalid: usize,
    pub parse_errors: usize,
    pub trades_with_warnings: usize,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub usage: Usage,
    pub validators: BTreeMap<String, ValidatorTally>,
    pub per_trade: Vec<TradeTally>,
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlassBoxData {
    /// Keyed by trade id
    pub trades: BTreeMap<String, GlassBoxRecord>,
    pub summary: RunSummary,
    pub decision_context: DecisionContext,
}

/// Everything a run produced that the audit bundle draws on
pub struct EnrichmentInput<'a> {
    pub execution_id: Uuid,
    pub strategy: &'a Strategy,
    pub context: &'a TradingContext,
    pub prompt: &'a ComposedPrompt,
    pub completion: &'a Completion,
    pub validation: &'a BatchValidation,
    pub parse_errors: &'a [ParseIssue],
}

#[derive(Debug, Clone, Default)]
pub struct GlassBoxEnricher;

impl GlassBoxEnricher {
    pub fn new() -> Self {
        Self
    }

    pub fn enrich(&self, input: &EnrichmentInput<'_>) -> GlassBoxData {
        let now = Utc::now();
        let fingerprint = prompt_fingerprint(input.prompt);

        let trades = input
            .validation
            .valid
            .iter()
            .map(|trade| {
                (
                    trade.id.to_string(),
                    GlassBoxRecord::new(trade, input.context, fingerprint, now),
                )
            })
            .collect();

        GlassBoxData {
            trades,
            summary: summarize(input, now),
            decision_context: DecisionContext {
                prompt_fingerprint: fingerprint,
                system_prompt: input.prompt.system_prompt.clone(),
                user_prompt: input.prompt.user_prompt.clone(),
                response_content: input.completion.content.clone(),
                finish_reason: input.completion.finish_reason.clone(),
            },
        }
    }
}

pub fn prompt_fingerprint(prompt: &ComposedPrompt) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, prompt.full_prompt.as_bytes())
}

fn summarize(input: &EnrichmentInput<'_>, now: DateTime<Utc>) -> RunSummary {
    let validation = input.validation;
    let evaluated = validation
        .valid
        .iter()
        .map(|t| (t, true))
        .chain(validation.invalid.iter().map(|i| (&i.trade, false)));

    let mut validators: BTreeMap<String, ValidatorTally> = BTreeMap::new();
    let mut per_trade = Vec::new();

    for (trade, valid) in evaluated {
        let results = trade
            .validation
            .as_ref()
            .map(|v| v.results.as_slice())
            .unwrap_or_default();

        for result in results {
            let tally = validators.entry(result.validator.clone()).or_default();
            if result.passed {
                tally.passed += 1;
            } else {
                tally.failed += 1;
            }
        }

        per_trade.push(TradeTally {
            trade_id: trade.id,
            asset: trade.asset.clone(),
            valid,
            checks_passed: results.iter().filter(|r| r.passed).count(),
            checks_failed: results.iter().filter(|r| !r.passed).count(),
        });
    }

    RunSummary {
        execution_id: input.execution_id,
        strategy_id: input.strategy.id.clone(),
        strategy_name: input.strategy.name.clone(),
        generated: validation.valid.len() + validation.invalid.len() + input.parse_errors.len(),
        valid: validation.valid.len(),
        invalid: validation.invalid.len(),
        parse_errors: input.parse_errors.len(),
        trades_with_warnings: validation.warnings.len(),
        provider: input.completion.provider.clone(),
        model: input.completion.model.clone(),
        latency_ms: input.completion.latency_ms,
        usage: input.completion.usage,
        validators,
        per_trade,
        generated_at: Some(now),
    }
}
