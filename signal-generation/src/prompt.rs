// Prompt Composer
// Deterministic prompt text for the language model. No network access.
//
// The output contract stated here mirrors the validator chain: every hard
// number comes from `TradeConstraints` so both sides read the same limits.

use ai_providers::Prompt;
use common::{PriceQuote, Strategy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::context::TradingContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComposedPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub full_prompt: String,
}

impl ComposedPrompt {
    pub fn to_prompt(&self) -> Prompt {
        Prompt::new(self.system_prompt.clone(), self.user_prompt.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, context: &TradingContext, strategy: &Strategy) -> ComposedPrompt {
        let system_prompt = system_prompt(context);
        let user_prompt = [
            strategy_section(strategy),
            price_table(context),
            analysis_section(context),
            sizing_section(context),
            output_contract(context),
        ]
        .join("\n\n");
        let full_prompt = format!("{}\n\n{}", system_prompt, user_prompt);

        ComposedPrompt {
            system_prompt,
            user_prompt,
            full_prompt,
        }
    }
}

fn system_prompt(context: &TradingContext) -> String {
    [
        "You are a disciplined cryptocurrency trading analyst.".to_string(),
        "You apply the user's strategy exactly as written to the market data provided and propose concrete trades.".to_string(),
        "You never invent prices: entries must be close to the current prices listed.".to_string(),
        format!(
            "You answer with a JSON array of exactly {} trade object(s) and nothing else.",
            context.num_results
        ),
    ]
    .join("\n")
}

fn strategy_section(strategy: &Strategy) -> String {
    format!(
        "## Strategy: {}\n\n<strategy>\n{}\n</strategy>",
        strategy.name, strategy.content
    )
}

fn price_table(context: &TradingContext) -> String {
    let mut lines = vec![
        "## Current Market Prices".to_string(),
        String::new(),
        "| Asset | Price | 24h Change | 24h High | 24h Low | 24h Quote Volume |".to_string(),
        "|-------|-------|------------|----------|---------|------------------|".to_string(),
    ];
    for quote in context.prices.values() {
        lines.push(price_row(quote));
    }
    if context.prices.is_empty() {
        lines.push("| (no prices available) | | | | | |".to_string());
    }
    lines.join("\n")
}

fn price_row(quote: &PriceQuote) -> String {
    let opt = |value: Option<Decimal>, fmt: fn(Decimal) -> String| value.map(fmt).unwrap_or_else(|| "n/a".to_string());
    format!(
        "| {} | {} | {} | {} | {} | {} |",
        quote.symbol,
        format_price(quote.price),
        opt(quote.change_percent_24h, format_change),
        opt(quote.high_24h, format_price),
        opt(quote.low_24h, format_price),
        opt(quote.quote_volume_24h, format_volume),
    )
}

fn analysis_section(context: &TradingContext) -> String {
    let analysis = &context.market_analysis;
    let summary = &context.prices_summary;
    let join = |items: Vec<String>| {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.join(", ")
        }
    };

    let mut lines = vec!["## Market Analysis".to_string(), String::new()];
    lines.push(format!(
        "- Top gainers (24h): {}",
        join(analysis
            .top_gainers
            .iter()
            .map(|m| format!("{} {}", m.symbol, format_change(m.change_percent)))
            .collect())
    ));
    lines.push(format!(
        "- Top losers (24h): {}",
        join(analysis
            .top_losers
            .iter()
            .map(|m| format!("{} {}", m.symbol, format_change(m.change_percent)))
            .collect())
    ));
    lines.push(format!(
        "- High volume: {}",
        join(analysis
            .high_volume
            .iter()
            .map(|v| format!("{} ({})", v.symbol, format_volume(v.quote_volume)))
            .collect())
    ));
    lines.push(format!(
        "- Near 24h support: {}",
        join(analysis
            .near_support
            .iter()
            .map(|l| format!("{} (low {})", l.symbol, format_price(l.low)))
            .collect())
    ));
    lines.push(format!(
        "- Near 24h resistance: {}",
        join(analysis
            .near_resistance
            .iter()
            .map(|l| format!("{} (high {})", l.symbol, format_price(l.high)))
            .collect())
    ));
    lines.push(format!(
        "- Breadth: {} advancing, {} declining, average change {}",
        summary.advancing,
        summary.declining,
        summary
            .average_change_percent
            .map(format_change)
            .unwrap_or_else(|| "n/a".to_string())
    ));
    lines.join("\n")
}

fn sizing_section(context: &TradingContext) -> String {
    let sizing = &context.position_sizing;
    let exec = &context.execution_params;

    let mut lines = vec![
        "## Position Sizing & Execution".to_string(),
        String::new(),
        format!("- Total capital: {:.2} USDT across {} trade(s)", sizing.total_capital, sizing.num_trades),
        format!("- Capital per trade: {:.2} USDT", sizing.capital_per_trade),
        format!("- Leverage: {}x (effective position {:.2} USDT)", sizing.leverage, sizing.effective_position),
        format!(
            "- Maximum risk per trade: {:.2} USDT ({}% of per-trade capital)",
            sizing.max_risk_per_trade, sizing.risk_ceiling_pct
        ),
        format!("- Execution time: {} ({})", exec.execution_time, exec.description),
        format!("- Maximum holding period: {} hour(s)", exec.max_duration_hours),
        format!("- Suggested leverage band: {}x to {}x", exec.leverage_min, exec.leverage_max),
    ];
    if let Some(target) = exec.target_pct {
        lines.push(format!("- Profit target: {}% from entry", target));
    }
    lines.join("\n")
}

fn output_contract(context: &TradingContext) -> String {
    let c = &context.constraints;
    [
        "## Output Format".to_string(),
        String::new(),
        format!(
            "Respond with a JSON array of exactly {} object(s). Each object has these fields:",
            context.num_results
        ),
        "- \"asset\": symbol exactly as listed in the price table (e.g. \"BTC/USDT\")".to_string(),
        "- \"direction\": \"LONG\" or \"SHORT\"".to_string(),
        "- \"entry\": entry price (number)".to_string(),
        "- \"takeProfit\": take-profit price (number)".to_string(),
        "- \"stopLoss\": stop-loss price (number)".to_string(),
        "- \"leverage\": leverage to use (number)".to_string(),
        "- \"ipe\": Investment Potential Estimate, your confidence score (number)".to_string(),
        "- \"reasoning\": object with \"summary\", \"technical\", \"fundamental\" and \"risk\" strings".to_string(),
        "- \"criteria\": array of strategy criteria this trade matches (strings)".to_string(),
        "- \"confidenceFactors\": array of {\"factor\": string, \"weight\": number, \"score\": number}".to_string(),
        String::new(),
        "Hard constraints:".to_string(),
        format!("- ipe must be between {} and {}", c.min_ipe, c.max_ipe),
        format!(
            "- risk/reward (|takeProfit - entry| / |entry - stopLoss|) must be at least {}",
            c.min_risk_reward
        ),
        format!(
            "- entry must be within {}% of the current price",
            c.max_entry_deviation_pct
        ),
        format!("- list at least {} matched criteria", c.min_criteria),
        "- confidenceFactors weights must sum to 100".to_string(),
        "- LONG: takeProfit > entry > stopLoss. SHORT: takeProfit < entry < stopLoss".to_string(),
        String::new(),
        "Return only the JSON array. No commentary before or after it.".to_string(),
    ]
    .join("\n")
}

fn format_price(price: Decimal) -> String {
    if price >= Decimal::ONE {
        format!("{:.2}", price.round_dp(2))
    } else {
        format!("{:.6}", price.round_dp(6))
    }
}

fn format_change(change: Decimal) -> String {
    let sign = if change.is_sign_negative() { "" } else { "+" };
    format!("{}{:.2}%", sign, change.round_dp(2))
}

fn format_volume(volume: Decimal) -> String {
    let scaled = |unit: i64, suffix: &str| format!("{:.2}{}", (volume / Decimal::from(unit)).round_dp(2), suffix);
    if volume >= Decimal::from(1_000_000_000) {
        scaled(1_000_000_000, "B")
    } else if volume >= Decimal::from(1_000_000) {
        scaled(1_000_000, "M")
    } else if volume >= Decimal::from(1_000) {
        scaled(1_000, "K")
    } else {
        scaled(1, "")
    }
}
