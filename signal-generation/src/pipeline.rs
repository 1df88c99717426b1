// Signal Generation Pipeline
// Runs one strategy through prices -> context -> prompt -> AI -> parse ->
// validate -> Glass Box, in plan order, with per-step timeout and retry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ai_providers::{AiClient, AiError, Completion};
use chrono::Utc;
use common::{
    InputError, PipelineInput, PipelineSettings, PriceFeedMetadata, PriceFeedOutput, PriceMap,
    StepSettings,
};
use data_ingestion::{default_assets, PriceFeedError, PriceSource};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::{ContextBuilder, TradingContext};
use crate::glass_box::{EnrichmentInput, GlassBoxData, GlassBoxEnricher};
use crate::parser::{ParseError, ParseIssue, ParseOutput, ParseScope, ResponseParser};
use crate::prompt::{ComposedPrompt, PromptComposer};
use crate::signals::{InvalidTrade, NormalizedTrade, TradeWarnings};
use crate::telemetry::{TelemetryEvent, TelemetryLevel, TelemetrySink, TracingTelemetry};
use crate::validators::{BatchValidation, ValidatorChain};

/// Pipeline steps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    ValidateInput,
    FetchPrices,
    BuildContext,
    ComposePrompt,
    CallAi,
    ParseResponse,
    ValidateTrades,
    EnrichGlassBox,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::ValidateInput => "validate_input",
            StepName::FetchPrices => "fetch_prices",
            StepName::BuildContext => "build_context",
            StepName::ComposePrompt => "compose_prompt",
            StepName::CallAi => "call_ai",
            StepName::ParseResponse => "parse_response",
            StepName::ValidateTrades => "validate_trades",
            StepName::EnrichGlassBox => "enrich_glass_box",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one step in the plan
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub name: StepName,
    pub depends_on: Vec<StepName>,
    pub timeout: Duration,
    /// Extra attempts after the first, for retryable errors only
    pub retries: u32,
    /// Failure is recorded and the run continues
    pub optional: bool,
}

impl StepSpec {
    pub fn new(name: StepName, depends_on: &[StepName], timeout: Duration, retries: u32) -> Self {
        Self {
            name,
            depends_on: depends_on.to_vec(),
            timeout,
            retries,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// The standard plan. Network steps get retries; transforms never retry.
pub fn default_plan(steps: &StepSettings) -> Vec<StepSpec> {
    use StepName::*;

    let transform = Duration::from_secs(steps.transform_timeout_secs);
    let prices = Duration::from_secs(steps.price_timeout_secs);
    let ai = Duration::from_secs(steps.ai_timeout_secs);

    vec![
        StepSpec::new(ValidateInput, &[], transform, 0),
        StepSpec::new(FetchPrices, &[ValidateInput], prices, steps.price_retries),
        StepSpec::new(BuildContext, &[FetchPrices], transform, 0),
        StepSpec::new(ComposePrompt, &[BuildContext], transform, 0),
        StepSpec::new(CallAi, &[ComposePrompt], ai, steps.ai_retries),
        StepSpec::new(ParseResponse, &[CallAi], transform, 0),
        StepSpec::new(ValidateTrades, &[BuildContext, ParseResponse], transform, 0),
        StepSpec::new(EnrichGlassBox, &[ValidateTrades], transform, 0).optional(),
    ]
}

/// Names are unique and every prerequisite is declared earlier in the plan
pub fn validate_plan(plan: &[StepSpec]) -> Result<(), PipelineError> {
    let mut position: HashMap<StepName, usize> = HashMap::new();
    for (i, spec) in plan.iter().enumerate() {
        if position.insert(spec.name, i).is_some() {
            return Err(PipelineError::InvalidPlan(format!(
                "step {} declared twice",
                spec.name
            )));
        }
    }

    for (i, spec) in plan.iter().enumerate() {
        for dep in &spec.depends_on {
            match position.get(dep) {
                Some(&p) if p < i => {}
                Some(_) => {
                    return Err(PipelineError::InvalidPlan(format!(
                        "step {} depends on {}, which runs after it",
                        spec.name, dep
                    )))
                }
                None => {
                    return Err(PipelineError::InvalidPlan(format!(
                        "step {} depends on undeclared step {}",
                        spec.name, dep
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Root cause of a step failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid pipeline input: {0}")]
    Input(#[from] InputError),

    #[error("price feed: {0}")]
    PriceFeed(#[from] PriceFeedError),

    #[error("AI provider: {0}")]
    Ai(#[from] AiError),

    #[error("response parsing: {0}")]
    Parse(#[from] ParseError),

    #[error("step {step} timed out after {timeout_ms}ms")]
    StepTimeout { step: StepName, timeout_ms: u64 },

    #[error("step {step} needs the output of {missing}")]
    MissingOutput { step: StepName, missing: StepName },

    #[error("step {step} depends on {dependency}, which has not completed")]
    DependencyNotMet { step: StepName, dependency: StepName },

    #[error("invalid step plan: {0}")]
    InvalidPlan(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::PriceFeed(e) => e.is_retryable(),
            PipelineError::Ai(e) => e.is_retryable(),
            PipelineError::StepTimeout { .. } => true,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::PriceFeed(e) => e.retry_after(),
            PipelineError::Ai(e) => e.retry_after(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
    pub step: StepName,
    pub status: StepStatus,
    pub optional: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Telemetry messages recorded while the step ran
    pub events: Vec<String>,
}

/// Terminal error of a run
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("run {execution_id} failed at step {step} after {attempts} attempt(s): {cause}")]
pub struct RunFailure {
    pub execution_id: Uuid,
    pub step: StepName,
    pub attempts: u32,
    pub retries: u32,
    #[source]
    #[serde(serialize_with = "serialize_display")]
    pub cause: PipelineError,
    /// Metadata of every step that ran, including the failing one
    pub step_metadata: Vec<StepMetadata>,
}

fn serialize_display<S: Serializer, T: fmt::Display>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub execution_id: Uuid,
    pub strategy_id: String,
    /// Trades that passed every error-severity validator
    pub trades: Vec<NormalizedTrade>,
    pub invalid_trades: Vec<InvalidTrade>,
    pub parse_errors: Vec<ParseIssue>,
    pub validation_warnings: Vec<TradeWarnings>,
    pub glass_box_data: GlassBoxData,
    pub price_metadata: Option<PriceFeedMetadata>,
    pub per_step_metadata: Vec<StepMetadata>,
}

enum StepOutput {
    InputChecked,
    Prices(PriceFeedOutput),
    Context(Box<TradingContext>),
    Prompt(ComposedPrompt),
    Completion(Completion),
    Parsed(ParseOutput),
    Validated(BatchValidation),
    GlassBox(Box<GlassBoxData>),
}

impl StepOutput {
    fn summary(&self) -> String {
        match self {
            StepOutput::InputChecked => "input accepted".to_string(),
            StepOutput::Prices(p) => format!(
                "{} prices fetched, {} missing, {} with failed 24h stats",
                p.prices.len(),
                p.metadata.missing_assets.len(),
                p.metadata.stats_failed.len()
            ),
            StepOutput::Context(c) => format!(
                "{} gainers, {} losers, {} high-volume assets",
                c.market_analysis.top_gainers.len(),
                c.market_analysis.top_losers.len(),
                c.market_analysis.high_volume.len()
            ),
            StepOutput::Prompt(p) => format!("prompt composed ({} chars)", p.full_prompt.len()),
            StepOutput::Completion(c) => format!(
                "{} / {} responded in {}ms ({} tokens)",
                c.provider, c.model, c.latency_ms, c.usage.total_tokens
            ),
            StepOutput::Parsed(p) => format!(
                "{} trades parsed, {} malformed",
                p.trades.len(),
                p.parse_errors.len()
            ),
            StepOutput::Validated(v) => format!(
                "{} valid, {} invalid, {} with warnings",
                v.valid.len(),
                v.invalid.len(),
                v.warnings.len()
            ),
            StepOutput::GlassBox(g) => format!("{} audit records", g.trades.len()),
        }
    }
}

/// State of one run. Created by [`SignalPipeline::run`] and dropped with it.
struct RunContext {
    execution_id: Uuid,
    input: PipelineInput,
    prices: Option<PriceFeedOutput>,
    trading_context: Option<TradingContext>,
    prompt: Option<ComposedPrompt>,
    completion: Option<Completion>,
    parsed: Option<ParseOutput>,
    validation: Option<BatchValidation>,
    glass_box: Option<GlassBoxData>,
    telemetry: Arc<dyn TelemetrySink>,
    step_metadata: Vec<StepMetadata>,
    step_events: Vec<String>,
}

impl RunContext {
    fn new(input: PipelineInput, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            input,
            prices: None,
            trading_context: None,
            prompt: None,
            completion: None,
            parsed: None,
            validation: None,
            glass_box: None,
            telemetry,
            step_metadata: Vec::new(),
            step_events: Vec::new(),
        }
    }

    fn emit(&mut self, step: Option<StepName>, level: TelemetryLevel, message: String) {
        self.telemetry.record(&TelemetryEvent {
            at: Utc::now(),
            execution_id: self.execution_id,
            step,
            level,
            message: message.clone(),
        });
        if step.is_some() {
            self.step_events.push(message);
        }
    }

    fn store(&mut self, output: StepOutput) {
        match output {
            StepOutput::InputChecked => {}
            StepOutput::Prices(p) => self.prices = Some(p),
            StepOutput::Context(c) => self.trading_context = Some(*c),
            StepOutput::Prompt(p) => self.prompt = Some(p),
            StepOutput::Completion(c) => self.completion = Some(c),
            StepOutput::Parsed(p) => self.parsed = Some(p),
            StepOutput::Validated(v) => self.validation = Some(v),
            StepOutput::GlassBox(g) => self.glass_box = Some(*g),
        }
    }

    fn finish_step(&mut self, spec: &StepSpec, status: StepStatus, attempts: u32, started: Instant, error: Option<String>) {
        self.step_metadata.push(StepMetadata {
            step: spec.name,
            status,
            optional: spec.optional,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
            events: std::mem::take(&mut self.step_events),
        });
    }

    fn status_of(&self, step: StepName) -> Option<&StepMetadata> {
        self.step_metadata.iter().find(|m| m.step == step)
    }

    fn require<'a, T>(value: &'a Option<T>, step: StepName, missing: StepName) -> Result<&'a T, PipelineError> {
        value
            .as_ref()
            .ok_or(PipelineError::MissingOutput { step, missing })
    }

    fn into_failure(self, step: StepName, attempts: u32, cause: PipelineError) -> RunFailure {
        RunFailure {
            execution_id: self.execution_id,
            step,
            attempts,
            retries: attempts.saturating_sub(1),
            cause,
            step_metadata: self.step_metadata,
        }
    }

    fn into_output(self) -> PipelineOutput {
        let validation = self.validation.unwrap_or_default();
        let parsed = self.parsed.unwrap_or_default();

        PipelineOutput {
            execution_id: self.execution_id,
            strategy_id: self.input.strategy.id,
            trades: validation.valid,
            invalid_trades: validation.invalid,
            parse_errors: parsed.parse_errors,
            validation_warnings: validation.warnings,
            glass_box_data: self.glass_box.unwrap_or_default(),
            price_metadata: self.prices.map(|p| p.metadata),
            per_step_metadata: self.step_metadata,
        }
    }
}

/// Signal generation pipeline
pub struct SignalPipeline {
    plan: Vec<StepSpec>,
    retry_backoff: Duration,
    prices: Arc<dyn PriceSource>,
    ai: AiClient,
    context_builder: ContextBuilder,
    composer: PromptComposer,
    parser: ResponseParser,
    validators: ValidatorChain,
    enricher: GlassBoxEnricher,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SignalPipeline {
    pub fn new(settings: &PipelineSettings, prices: Arc<dyn PriceSource>, ai: AiClient) -> Result<Self, PipelineError> {
        let plan = default_plan(&settings.steps);
        validate_plan(&plan)?;

        Ok(Self {
            plan,
            retry_backoff: Duration::from_millis(settings.steps.retry_backoff_ms),
            prices,
            ai,
            context_builder: ContextBuilder::new(settings.analysis.clone(), settings.validation.clone()),
            composer: PromptComposer::new(),
            parser: ResponseParser::new(),
            validators: ValidatorChain::with_defaults(),
            enricher: GlassBoxEnricher::new(),
            telemetry: Arc::new(TracingTelemetry),
        })
    }

    /// Replace the step plan
    pub fn with_plan(mut self, plan: Vec<StepSpec>) -> Result<Self, PipelineError> {
        validate_plan(&plan)?;
        self.plan = plan;
        Ok(self)
    }

    pub fn with_validators(mut self, validators: ValidatorChain) -> Self {
        info!("Using validator chain: {:?}", validators.names());
        self.validators = validators;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn plan(&self) -> &[StepSpec] {
        &self.plan
    }

    /// Execute one run. Runs share nothing and may execute concurrently.
    pub async fn run(&self, input: PipelineInput) -> Result<PipelineOutput, RunFailure> {
        let mut ctx = RunContext::new(input, self.telemetry.clone());
        let started = Instant::now();
        ctx.emit(
            None,
            TelemetryLevel::Info,
            format!(
                "Starting run for strategy {} ({}) with {}",
                ctx.input.strategy.name, ctx.input.strategy.id, ctx.input.config.ai_provider
            ),
        );

        for spec in &self.plan {
            if let Err(e) = self.check_dependencies(spec, &ctx) {
                ctx.emit(Some(spec.name), TelemetryLevel::Error, e.to_string());
                return Err(ctx.into_failure(spec.name, 0, e));
            }

            if let Err((error, attempts)) = self.execute_step(spec, &mut ctx).await {
                if spec.optional {
                    ctx.emit(
                        None,
                        TelemetryLevel::Warn,
                        format!("Optional step {} failed, continuing: {}", spec.name, error),
                    );
                    continue;
                }
                ctx.emit(
                    None,
                    TelemetryLevel::Error,
                    format!("Run aborted at {}: {}", spec.name, error),
                );
                return Err(ctx.into_failure(spec.name, attempts, error));
            }
        }

        let output = ctx.into_output();
        info!(
            execution_id = %output.execution_id,
            valid = output.trades.len(),
            invalid = output.invalid_trades.len(),
            parse_errors = output.parse_errors.len(),
            "Run completed in {}ms",
            started.elapsed().as_millis()
        );
        Ok(output)
    }

    // A prerequisite is satisfied when it completed, or when it is optional
    // and failed; its output is then read as a default.
    fn check_dependencies(&self, spec: &StepSpec, ctx: &RunContext) -> Result<(), PipelineError> {
        for dep in &spec.depends_on {
            let satisfied = match ctx.status_of(*dep) {
                Some(meta) => meta.status == StepStatus::Completed || meta.optional,
                None => false,
            };
            if !satisfied {
                return Err(PipelineError::DependencyNotMet {
                    step: spec.name,
                    dependency: *dep,
                });
            }
        }
        Ok(())
    }

    async fn execute_step(&self, spec: &StepSpec, ctx: &mut RunContext) -> Result<u32, (PipelineError, u32)> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(execution_id = %ctx.execution_id, step = %spec.name, attempt, "Running step");

            let result = match tokio::time::timeout(spec.timeout, self.run_once(spec.name, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StepTimeout {
                    step: spec.name,
                    timeout_ms: spec.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(output) => {
                    let summary = output.summary();
                    ctx.store(output);
                    ctx.emit(Some(spec.name), TelemetryLevel::Info, summary);
                    ctx.finish_step(spec, StepStatus::Completed, attempt, started, None);
                    return Ok(attempt);
                }
                Err(error) if error.is_retryable() && attempt <= spec.retries => {
                    let delay = self.backoff(attempt, &error);
                    ctx.emit(
                        Some(spec.name),
                        TelemetryLevel::Warn,
                        format!(
                            "attempt {} failed: {}; retrying in {}ms",
                            attempt,
                            error,
                            delay.as_millis()
                        ),
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    let level = if spec.optional {
                        TelemetryLevel::Warn
                    } else {
                        TelemetryLevel::Error
                    };
                    ctx.emit(Some(spec.name), level, format!("attempt {} failed: {}", attempt, error));
                    ctx.finish_step(spec, StepStatus::Failed, attempt, started, Some(error.to_string()));
                    return Err((error, attempt));
                }
            }
        }
    }

    /// Server-provided retry-after wins over exponential backoff
    fn backoff(&self, attempt: u32, error: &PipelineError) -> Duration {
        error
            .retry_after()
            .unwrap_or_else(|| self.retry_backoff * 2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    async fn run_once(&self, step: StepName, ctx: &RunContext) -> Result<StepOutput, PipelineError> {
        let config = &ctx.input.config;

        match step {
            StepName::ValidateInput => {
                self.context_builder.validate_config(config)?;
                Ok(StepOutput::InputChecked)
            }
            StepName::FetchPrices => {
                let assets = config
                    .assets
                    .clone()
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(default_assets);
                let output = self.prices.fetch(&assets).await?;
                Ok(StepOutput::Prices(output))
            }
            StepName::BuildContext => {
                let empty = PriceMap::new();
                let prices = ctx.prices.as_ref().map(|p| &p.prices).unwrap_or(&empty);
                let context = self.context_builder.build(prices, config)?;
                Ok(StepOutput::Context(Box::new(context)))
            }
            StepName::ComposePrompt => {
                let context = RunContext::require(&ctx.trading_context, step, StepName::BuildContext)?;
                Ok(StepOutput::Prompt(self.composer.compose(context, &ctx.input.strategy)))
            }
            StepName::CallAi => {
                let prompt = RunContext::require(&ctx.prompt, step, StepName::ComposePrompt)?;
                let completion = self
                    .ai
                    .call(&prompt.to_prompt(), &config.ai_provider, config.api_key(), config.model())
                    .await?;
                Ok(StepOutput::Completion(completion))
            }
            StepName::ParseResponse => {
                let completion = RunContext::require(&ctx.completion, step, StepName::CallAi)?;
                let scope = ParseScope {
                    execution_id: ctx.execution_id,
                    strategy: &ctx.input.strategy,
                };
                Ok(StepOutput::Parsed(self.parser.parse(&completion.content, &scope)?))
            }
            StepName::ValidateTrades => {
                let context = RunContext::require(&ctx.trading_context, step, StepName::BuildContext)?;
                let parsed = RunContext::require(&ctx.parsed, step, StepName::ParseResponse)?;
                Ok(StepOutput::Validated(
                    self.validators.validate_batch(parsed.trades.clone(), context),
                ))
            }
            StepName::EnrichGlassBox => {
                let input = EnrichmentInput {
                    execution_id: ctx.execution_id,
                    strategy: &ctx.input.strategy,
                    context: RunContext::require(&ctx.trading_context, step, StepName::BuildContext)?,
                    prompt: RunContext::require(&ctx.prompt, step, StepName::ComposePrompt)?,
                    completion: RunContext::require(&ctx.completion, step, StepName::CallAi)?,
                    validation: RunContext::require(&ctx.validation, step, StepName::ValidateTrades)?,
                    parse_errors: ctx
                        .parsed
                        .as_ref()
                        .map(|p| p.parse_errors.as_slice())
                        .unwrap_or_default(),
                };
                Ok(StepOutput::GlassBox(Box::new(self.enricher.enrich(&input))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{Severity, Threshold};
    use crate::telemetry::MemoryTelemetry;
    use crate::test_support::{run_config, strategy};
    use crate::validators::{Check, TradeValidator};
    use ai_providers::{AiProvider, GenerateOptions, Prompt, ProviderRegistry, Usage};
    use async_trait::async_trait;
    use common::PriceQuote;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const SCENARIO_A: &str = r#"[{"asset":"BTC/USDT","strategy":"LONG","entry":95000,"takeProfit":100000,"stopLoss":92000,"ipe":85}]"#;
    const SCENARIO_B: &str = r#"[{"asset":"BTC/USDT","strategy":"LONG","entry":95000,"takeProfit":105000,"stopLoss":90000,"ipe":85}]"#;

    struct FakePriceSource {
        quotes: Vec<(&'static str, Decimal)>,
        failures: AtomicU32,
        error: PriceFeedError,
        calls: AtomicU32,
    }

    impl FakePriceSource {
        fn new(quotes: Vec<(&'static str, Decimal)>) -> Self {
            Self {
                quotes,
                failures: AtomicU32::new(0),
                error: PriceFeedError::Server { status: 503 },
                calls: AtomicU32::new(0),
            }
        }

        fn failing(mut self, times: u32, error: PriceFeedError) -> Self {
            self.failures = AtomicU32::new(times);
            self.error = error;
            self
        }
    }

    #[async_trait]
    impl PriceSource for FakePriceSource {
        async fn fetch(&self, assets: &[String]) -> Result<PriceFeedOutput, PriceFeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(self.error.clone());
            }

            let mut prices = PriceMap::new();
            let mut missing = Vec::new();
            for asset in assets {
                match self.quotes.iter().find(|(s, _)| *s == asset.as_str()) {
                    Some((symbol, price)) => {
                        prices.insert(symbol.to_string(), PriceQuote::new(*symbol, *price));
                    }
                    None => missing.push(asset.clone()),
                }
            }

            Ok(PriceFeedOutput {
                prices,
                metadata: PriceFeedMetadata {
                    source: "fake".to_string(),
                    fetched_at: Utc::now(),
                    requested_assets: assets.to_vec(),
                    missing_assets: missing,
                    stats_fetched: 0,
                    stats_failed: Vec::new(),
                    latency_ms: 0,
                },
            })
        }
    }

    /// Never answers within any reasonable step timeout
    struct StalledPriceSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PriceSource for StalledPriceSource {
        async fn fetch(&self, _assets: &[String]) -> Result<PriceFeedOutput, PriceFeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(PriceFeedError::Server { status: 504 })
        }
    }

    /// Replays scripted results, then repeats the last one
    struct ScriptedProvider {
        script: Mutex<Vec<Result<String, AiError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, AiError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        fn replying(content: &str) -> Self {
            Self::new(vec![Ok(content.to_string())])
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "fake"
        }

        fn default_model(&self) -> &str {
            "fake-model"
        }

        async fn generate(&self, _prompt: &Prompt, _api_key: &str, _options: &GenerateOptions) -> Result<Completion, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script[0].clone()
                }
            };
            next.map(|content| Completion {
                content,
                usage: Usage::new(1200, 300),
                provider: "fake".to_string(),
                model: "fake-model".to_string(),
                finish_reason: Some("stop".to_string()),
                latency_ms: 5,
                raw: serde_json::Value::Null,
            })
        }
    }

    fn settings() -> PipelineSettings {
        let mut settings = PipelineSettings::default();
        settings.steps.retry_backoff_ms = 1;
        settings
    }

    fn pipeline(prices: Arc<dyn PriceSource>, provider: Arc<ScriptedProvider>) -> SignalPipeline {
        let settings = settings();
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        let ai = AiClient::new(registry, &settings.ai);
        SignalPipeline::new(&settings, prices, ai).unwrap()
    }

    fn input() -> PipelineInput {
        let mut config = run_config();
        config.assets = Some(vec!["BTC/USDT".to_string()]);
        PipelineInput {
            strategy: strategy(),
            config,
        }
    }

    fn btc() -> Arc<FakePriceSource> {
        Arc::new(FakePriceSource::new(vec![("BTC/USDT", dec!(95000))]))
    }

    #[tokio::test]
    async fn test_scenario_a_rejects_low_risk_reward() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying(SCENARIO_A)));
        let output = pipeline.run(input()).await.unwrap();

        assert!(output.trades.is_empty());
        assert_eq!(output.invalid_trades.len(), 1);
        let invalid = &output.invalid_trades[0];
        assert_eq!(invalid.trade.risk_reward_ratio, dec!(1.67));
        assert_eq!(invalid.failed_validations.len(), 1);
        assert_eq!(invalid.failed_validations[0].validator, "risk_reward");
        assert!(output.glass_box_data.trades.is_empty());
        assert_eq!(output.glass_box_data.summary.invalid, 1);
    }

    #[tokio::test]
    async fn test_scenario_b_accepts_trade() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying(SCENARIO_B)));
        let output = pipeline.run(input()).await.unwrap();

        assert_eq!(output.trades.len(), 1);
        let trade = &output.trades[0];
        assert_eq!(trade.risk_reward_ratio, dec!(2));
        assert_eq!(trade.status, crate::signals::TradeStatus::Pending);
        assert!(output.invalid_trades.is_empty());

        // no criteria and no confidence factors: advisory only
        assert_eq!(output.validation_warnings.len(), 1);
        assert_eq!(output.validation_warnings[0].trade_id, trade.id);

        let record = &output.glass_box_data.trades[&trade.id.to_string()];
        assert_eq!(record.asset(), "BTC/USDT");
        assert_eq!(output.glass_box_data.summary.model, "fake-model");
        assert_eq!(output.glass_box_data.summary.usage.total_tokens, 1500);

        let steps: Vec<StepName> = output.per_step_metadata.iter().map(|m| m.step).collect();
        assert_eq!(steps, pipeline.plan().iter().map(|s| s.name).collect::<Vec<_>>());
        assert!(output.per_step_metadata.iter().all(|m| m.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_missing_asset_does_not_fail_run() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying(SCENARIO_B)));
        let mut input = input();
        input.config.assets = Some(vec!["BTC/USDT".to_string(), "FOO/USDT".to_string()]);

        let output = pipeline.run(input).await.unwrap();
        let metadata = output.price_metadata.unwrap();
        assert_eq!(metadata.missing_assets, vec!["FOO/USDT"]);
        assert_eq!(output.trades.len(), 1);
    }

    #[tokio::test]
    async fn test_price_fetch_retries_then_succeeds() {
        let prices = Arc::new(FakePriceSource::new(vec![("BTC/USDT", dec!(95000))]).failing(
            2,
            PriceFeedError::Timeout {
                endpoint: "/api/v3/ticker/price".to_string(),
                timeout_ms: 10,
            },
        ));
        let pipeline = pipeline(prices.clone(), Arc::new(ScriptedProvider::replying(SCENARIO_B)));

        let output = pipeline.run(input()).await.unwrap();
        let fetch = &output.per_step_metadata[1];
        assert_eq!(fetch.step, StepName::FetchPrices);
        assert_eq!(fetch.attempts, 3);
        assert_eq!(fetch.events.len(), 3);
        assert_eq!(prices.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_price_fetch_exhausts_retries() {
        let prices = Arc::new(
            FakePriceSource::new(vec![("BTC/USDT", dec!(95000))]).failing(10, PriceFeedError::Server { status: 502 }),
        );
        let provider = Arc::new(ScriptedProvider::replying(SCENARIO_B));
        let pipeline = pipeline(prices, provider.clone());

        let failure = pipeline.run(input()).await.unwrap_err();
        assert_eq!(failure.step, StepName::FetchPrices);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.retries, 2);
        assert_eq!(failure.cause, PipelineError::PriceFeed(PriceFeedError::Server { status: 502 }));
        assert_eq!(failure.step_metadata.len(), 2);
        assert_eq!(failure.step_metadata[1].status, StepStatus::Failed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_fatal_without_retry() {
        let provider = Arc::new(ScriptedProvider::replying(SCENARIO_B));
        let pipeline = pipeline(btc(), provider.clone());
        let mut input = input();
        input.config.api_keys.clear();

        let failure = pipeline.run(input).await.unwrap_err();
        assert_eq!(failure.step, StepName::CallAi);
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.cause, PipelineError::Ai(AiError::MissingApiKey { .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_ai_call_is_retried_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(AiError::RateLimited {
                provider: "fake".to_string(),
                retry_after_ms: Some(1),
            }),
            Ok(SCENARIO_B.to_string()),
        ]));
        let pipeline = pipeline(btc(), provider.clone());

        let output = pipeline.run(input()).await.unwrap();
        assert_eq!(output.trades.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let call = output
            .per_step_metadata
            .iter()
            .find(|m| m.step == StepName::CallAi)
            .unwrap();
        assert_eq!(call.attempts, 2);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(AiError::Unauthorized {
            provider: "fake".to_string(),
            message: "invalid key".to_string(),
        })]));
        let pipeline = pipeline(btc(), provider.clone());

        let failure = pipeline.run(input()).await.unwrap_err();
        assert_eq!(failure.step, StepName::CallAi);
        assert_eq!(failure.retries, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unparseable_response_is_fatal() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying("The market looks choppy, no trades.")));

        let failure = pipeline.run(input()).await.unwrap_err();
        assert_eq!(failure.step, StepName::ParseResponse);
        assert!(matches!(failure.cause, PipelineError::Parse(ParseError::NoStructure { .. })));
        assert_eq!(failure.step_metadata.len(), 6);
    }

    #[tokio::test]
    async fn test_optional_step_failure_uses_defaults() {
        let prices = Arc::new(
            FakePriceSource::new(vec![]).failing(
                1,
                PriceFeedError::Http {
                    status: 400,
                    message: "Invalid symbol".to_string(),
                },
            ),
        );
        let settings = settings();
        let plan: Vec<StepSpec> = default_plan(&settings.steps)
            .into_iter()
            .map(|s| if s.name == StepName::FetchPrices { s.optional() } else { s })
            .collect();
        let pipeline = pipeline(prices, Arc::new(ScriptedProvider::replying(SCENARIO_B)))
            .with_plan(plan)
            .unwrap();

        let output = pipeline.run(input()).await.unwrap();
        assert!(output.price_metadata.is_none());
        assert_eq!(output.per_step_metadata[1].status, StepStatus::Failed);
        assert_eq!(output.per_step_metadata[1].attempts, 1);

        // entry deviation cannot be checked without a price and passes
        assert_eq!(output.trades.len(), 1);
        let deviation = output.trades[0]
            .validation
            .as_ref()
            .unwrap()
            .results
            .iter()
            .find(|r| r.validator == "entry_deviation")
            .unwrap()
            .clone();
        assert!(deviation.passed);
    }

    #[tokio::test]
    async fn test_throwing_validator_isolated_in_batch() {
        struct RejectsEth;

        impl TradeValidator for RejectsEth {
            fn name(&self) -> &str {
                "rejects_eth"
            }

            fn severity(&self) -> Severity {
                Severity::Warning
            }

            fn check(&self, trade: &NormalizedTrade, _context: &TradingContext) -> anyhow::Result<Check> {
                if trade.asset.starts_with("ETH") {
                    panic!("unsupported asset");
                }
                Ok(Check::new(true, "ok", None, Threshold::None))
            }
        }

        let response = r#"[
            {"asset":"ETH/USDT","direction":"LONG","entry":3000,"takeProfit":3300,"stopLoss":2850,"ipe":80},
            {"asset":"BTC/USDT","direction":"LONG","entry":95000,"takeProfit":105000,"stopLoss":90000,"ipe":85}
        ]"#;
        let prices = Arc::new(FakePriceSource::new(vec![("BTC/USDT", dec!(95000)), ("ETH/USDT", dec!(3000))]));
        let pipeline = pipeline(prices, Arc::new(ScriptedProvider::replying(response)))
            .with_validators(ValidatorChain::with_defaults().add(Box::new(RejectsEth)));
        let mut input = input();
        input.config.num_results = 2;
        input.config.assets = Some(vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);

        let output = pipeline.run(input).await.unwrap();
        assert_eq!(output.trades.len(), 1);
        assert_eq!(output.trades[0].asset, "BTC/USDT");
        assert_eq!(output.invalid_trades.len(), 1);
        assert_eq!(output.invalid_trades[0].failed_validations[0].validator, "rejects_eth");
    }

    #[tokio::test]
    async fn test_telemetry_is_injected_and_kept_on_failure() {
        let sink = Arc::new(MemoryTelemetry::new());
        let prices = Arc::new(FakePriceSource::new(vec![]).failing(10, PriceFeedError::Server { status: 500 }));
        let pipeline = pipeline(prices, Arc::new(ScriptedProvider::replying(SCENARIO_B)))
            .with_telemetry(sink.clone());

        let failure = pipeline.run(input()).await.unwrap_err();
        let events = sink.events_for(failure.execution_id);

        assert!(events.len() >= 5);
        assert!(events.iter().any(|e| e.level == TelemetryLevel::Error && e.step.is_none()));
        assert_eq!(failure.step_metadata[0].step, StepName::ValidateInput);
        assert_eq!(failure.step_metadata[1].events.len(), 3);

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["step"], "fetch_prices");
        assert_eq!(json["retries"], 2);
        assert!(json["cause"].as_str().unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_invalid_input_fails_first_step() {
        let prices = btc();
        let pipeline = pipeline(prices.clone(), Arc::new(ScriptedProvider::replying(SCENARIO_B)));
        let mut input = input();
        input.config.capital = Decimal::ZERO;

        let failure = pipeline.run(input).await.unwrap_err();
        assert_eq!(failure.step, StepName::ValidateInput);
        assert_eq!(failure.cause, PipelineError::Input(InputError::InvalidCapital(Decimal::ZERO)));
        assert_eq!(prices.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_min_ipe_above_ceiling_fails_first_step() {
        let prices = btc();
        let pipeline = pipeline(prices.clone(), Arc::new(ScriptedProvider::replying(SCENARIO_B)));
        let mut input = input();
        input.config.min_ipe = dec!(97);

        let failure = pipeline.run(input).await.unwrap_err();
        assert_eq!(failure.step, StepName::ValidateInput);
        assert_eq!(
            failure.cause,
            PipelineError::Input(InputError::MinIpeAboveMax {
                min_ipe: dec!(97),
                max_ipe: dec!(95)
            })
        );
        assert_eq!(prices.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_step_timeout_is_retried_and_abandons_call() {
        let prices = Arc::new(StalledPriceSource {
            calls: AtomicU32::new(0),
        });
        let provider = Arc::new(ScriptedProvider::replying(SCENARIO_B));
        let plan: Vec<StepSpec> = default_plan(&settings().steps)
            .into_iter()
            .map(|s| {
                if s.name == StepName::FetchPrices {
                    StepSpec::new(s.name, &s.depends_on, Duration::from_millis(20), 1)
                } else {
                    s
                }
            })
            .collect();
        let pipeline = pipeline(prices.clone(), provider.clone()).with_plan(plan).unwrap();

        let started = Instant::now();
        let failure = pipeline.run(input()).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(failure.step, StepName::FetchPrices);
        assert_eq!(
            failure.cause,
            PipelineError::StepTimeout {
                step: StepName::FetchPrices,
                timeout_ms: 20
            }
        );
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.retries, 1);
        assert_eq!(failure.step_metadata[1].status, StepStatus::Failed);
        assert_eq!(failure.step_metadata[1].events.len(), 2);
        assert_eq!(prices.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying(SCENARIO_B)));
        let (a, b) = tokio::join!(pipeline.run(input()), pipeline.run(input()));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.execution_id, b.execution_id);
        assert_ne!(a.trades[0].id, b.trades[0].id);
    }

    #[test]
    fn test_plan_validation() {
        let steps = StepSettings::default();
        assert!(validate_plan(&default_plan(&steps)).is_ok());

        let mut reversed = default_plan(&steps);
        reversed.swap(1, 2);
        assert!(matches!(validate_plan(&reversed), Err(PipelineError::InvalidPlan(_))));

        let mut duplicated = default_plan(&steps);
        duplicated.push(duplicated[0].clone());
        assert!(matches!(validate_plan(&duplicated), Err(PipelineError::InvalidPlan(_))));

        let undeclared = vec![StepSpec::new(StepName::BuildContext, &[StepName::FetchPrices], Duration::from_secs(1), 0)];
        assert!(validate_plan(&undeclared).is_err());
    }

    #[test]
    fn test_default_plan_retry_policy() {
        let plan = default_plan(&StepSettings::default());
        let retries: HashMap<StepName, u32> = plan.iter().map(|s| (s.name, s.retries)).collect();

        assert_eq!(retries[&StepName::FetchPrices], 2);
        assert_eq!(retries[&StepName::CallAi], 1);
        assert_eq!(retries[&StepName::ParseResponse], 0);
        assert!(plan.iter().filter(|s| s.optional).all(|s| s.name == StepName::EnrichGlassBox));
    }

    #[test]
    fn test_backoff_prefers_retry_after() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying("[]")));
        let limited = PipelineError::Ai(AiError::RateLimited {
            provider: "fake".to_string(),
            retry_after_ms: Some(2500),
        });
        assert_eq!(pipeline.backoff(1, &limited), Duration::from_millis(2500));

        let timeout = PipelineError::StepTimeout {
            step: StepName::CallAi,
            timeout_ms: 10,
        };
        assert_eq!(pipeline.backoff(1, &timeout), Duration::from_millis(1));
        assert_eq!(pipeline.backoff(3, &timeout), Duration::from_millis(4));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_run_future_is_send() {
        let pipeline = pipeline(btc(), Arc::new(ScriptedProvider::replying("[]")));
        let future = pipeline.run(input());
        assert_send(&future);
    }
}
