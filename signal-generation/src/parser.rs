// Response Parser
// Recovers the trade array from free-form AI text and normalizes each element

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use common::Strategy;

use crate::signals::{
    ConfidenceFactor, Direction, NormalizedTrade, RiskMetrics, TradeReasoning, TradeStatus,
};

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid fenced block regex");
}

/// Fatal parse errors; nothing can be salvaged from the response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("AI response is empty")]
    EmptyResponse,

    #[error("no JSON trade array found in AI response: {preview}")]
    NoStructure { preview: String },
}

/// Per-element failure that does not abort the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseIssue {
    pub index: usize,
    pub message: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutput {
    pub trades: Vec<NormalizedTrade>,
    pub parse_errors: Vec<ParseIssue>,
}

/// Raw, untrusted trade element as emitted by the AI.
/// Fields are looked up by their accepted aliases.
#[derive(Debug, Clone, Default)]
pub struct TradeCandidate {
    pub asset: Option<Value>,
    pub direction: Option<Value>,
    pub entry: Option<Value>,
    pub take_profit: Option<Value>,
    pub stop_loss: Option<Value>,
    pub ipe: Option<Value>,
    pub leverage: Option<Value>,
    pub reasoning: Option<Value>,
    pub criteria: Option<Value>,
    pub confidence_factors: Option<Value>,
}

impl TradeCandidate {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| object.get(*k))
                .find(|v| !v.is_null())
                .cloned()
        };

        Self {
            asset: pick(&["asset", "symbol", "pair"]),
            direction: pick_direction(object),
            entry: pick(&["entry", "entryPrice", "entry_price"]),
            take_profit: pick(&["takeProfit", "take_profit", "tp", "target"]),
            stop_loss: pick(&["stopLoss", "stop_loss", "sl"]),
            ipe: pick(&["ipe", "IPE", "confidence"]),
            leverage: pick(&["leverage"]),
            reasoning: pick(&["reasoning", "rationale"]),
            criteria: pick(&["criteria", "criteriaMatched", "criteria_matched"]),
            confidence_factors: pick(&["confidenceFactors", "confidence_factors", "confidenceBreakdown"]),
        }
    }
}

// "strategy" is sometimes a strategy label rather than a side, so the first
// key whose value reads as a direction wins.
fn pick_direction(object: &Map<String, Value>) -> Option<Value> {
    let keys = ["direction", "side", "strategy", "type"];
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| v.as_str().and_then(Direction::parse).is_some())
        .or_else(|| keys.iter().find_map(|k| object.get(*k)))
        .cloned()
}

/// Identifies the run a parse belongs to; part of every trade id
#[derive(Debug, Clone)]
pub struct ParseScope<'a> {
    pub execution_id: Uuid,
    pub strategy: &'a Strategy,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseParser;

impl ResponseParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str, scope: &ParseScope<'_>) -> Result<ParseOutput, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let elements = extract_trade_array(text).ok_or_else(|| ParseError::NoStructure {
            preview: preview(text),
        })?;

        let mut output = ParseOutput::default();
        for (index, element) in elements.into_iter().enumerate() {
            match normalize(index, &element, scope) {
                Ok(trade) => output.trades.push(trade),
                Err(message) => {
                    warn!(index, %message, "Dropping malformed trade element");
                    output.parse_errors.push(ParseIssue {
                        index,
                        message,
                        raw: element,
                    });
                }
            }
        }

        debug!(
            trades = output.trades.len(),
            errors = output.parse_errors.len(),
            "Parsed AI response"
        );
        Ok(output)
    }
}

/// Search order:
/// 1. a balanced array holding at least one object anywhere in the text
/// 2. the inside of a fenced code block
/// 3. any balanced array, so `[]` still reads as "no trades"
pub fn extract_trade_array(text: &str) -> Option<Vec<Value>> {
    if let Some(array) = find_balanced_array(text, holds_object) {
        return Some(array);
    }

    for capture in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = capture.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if let Some(array) = find_balanced_array(body, |_| true) {
            return Some(array);
        }
        // `{"trades": [...]}` wrapped in a fence
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body.trim()) {
            if let Some(Value::Array(array)) = object.get("trades") {
                return Some(array.clone());
            }
        }
    }

    find_balanced_array(text, |_| true)
}

fn holds_object(array: &[Value]) -> bool {
    array.iter().any(Value::is_object)
}

/// First `[` ... `]` span that is balanced (ignoring brackets inside strings),
/// parses as a JSON array and is accepted by `accept`
fn find_balanced_array(text: &str, accept: impl Fn(&[Value]) -> bool) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('[') {
        let open = start + offset;
        if let Some(close) = matching_bracket(bytes, open) {
            if let Ok(Value::Array(array)) = serde_json::from_str::<Value>(&text[open..=close]) {
                if accept(&array) {
                    return Some(array);
                }
            }
        }
        start = open + 1;
    }
    None
}

fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(120) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn normalize(index: usize, element: &Value, scope: &ParseScope<'_>) -> Result<NormalizedTrade, String> {
    let object = element
        .as_object()
        .ok_or_else(|| format!("element {} is not an object", index))?;
    let candidate = TradeCandidate::from_object(object);

    let asset = candidate
        .asset
        .as_ref()
        .and_then(Value::as_str)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or("missing asset")?;

    let direction_value = candidate.direction.as_ref().ok_or("missing direction")?;
    let direction = direction_value
        .as_str()
        .and_then(Direction::parse)
        .ok_or_else(|| format!("unrecognized direction {}", direction_value))?;

    let entry = required_price(&candidate.entry, "entry")?;
    let take_profit = required_price(&candidate.take_profit, "takeProfit")?;
    let stop_loss = required_price(&candidate.stop_loss, "stopLoss")?;
    let ipe = candidate
        .ipe
        .as_ref()
        .and_then(number)
        .ok_or("missing or non-numeric ipe")?;
    let leverage = candidate
        .leverage
        .as_ref()
        .and_then(number)
        .filter(|l| *l > Decimal::ZERO);

    let metrics = RiskMetrics::compute(entry, take_profit, stop_loss).rounded();

    Ok(NormalizedTrade {
        id: trade_id(scope, index, element),
        strategy_id: scope.strategy.id.clone(),
        strategy_name: scope.strategy.name.clone(),
        asset,
        direction,
        entry,
        take_profit,
        stop_loss,
        risk_reward_ratio: metrics.risk_reward_ratio,
        risk_percent: metrics.risk_percent,
        reward_percent: metrics.reward_percent,
        ipe,
        leverage,
        reasoning: reasoning(candidate.reasoning.as_ref()),
        criteria: criteria(candidate.criteria.as_ref()),
        confidence_factors: confidence_factors(candidate.confidence_factors.as_ref()),
        status: TradeStatus::Pending,
        validation: None,
        raw: element.clone(),
    })
}

fn trade_id(scope: &ParseScope<'_>, index: usize, element: &Value) -> Uuid {
    let name = format!(
        "{}:{}:{}:{}",
        scope.execution_id, scope.strategy.id, index, element
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn required_price(value: &Option<Value>, field: &str) -> Result<Decimal, String> {
    let value = value.as_ref().ok_or_else(|| format!("missing {}", field))?;
    match number(value) {
        Some(price) if price > Decimal::ZERO => Ok(price),
        Some(price) => Err(format!("{} must be positive, got {}", field, price)),
        None => Err(format!("{} is not a number: {}", field, value)),
    }
}

/// Numbers, or strings like "95,000.50" / "$95000"
fn number(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => decimal(&n.to_string()),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | '$' | '_' | ' '))
                .collect();
            decimal(cleaned.trim_end_matches('%'))
        }
        _ => None,
    }
}

fn decimal(text: &str) -> Option<Decimal> {
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn reasoning(value: Option<&Value>) -> TradeReasoning {
    match value {
        Some(Value::Object(map)) => TradeReasoning(map.clone()),
        Some(Value::String(s)) if !s.trim().is_empty() => TradeReasoning::from_summary(s.trim()),
        _ => TradeReasoning::default(),
    }
}

fn criteria(value: Option<&Value>) -> Vec<String> {
    let text = |v: &Value| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(o) => ["criterion", "name", "description"]
            .iter()
            .find_map(|k| o.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string()),
        _ => None,
    };

    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(text)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn confidence_factors(value: Option<&Value>) -> Vec<ConfidenceFactor> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let factor = ["factor", "name", "label"]
                .iter()
                .find_map(|k| object.get(*k).and_then(Value::as_str))?;
            let weight = object.get("weight").and_then(number)?;
            Some(ConfidenceFactor {
                factor: factor.to_string(),
                weight,
                score: ["score", "value"].iter().find_map(|k| object.get(*k).and_then(number)),
                description: object
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect()
}
