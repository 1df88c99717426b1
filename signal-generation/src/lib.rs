// Signal Generation Framework (Layer 2)
// Turns a free-text strategy plus live prices into validated, auditable trade signals

pub mod context;
pub mod glass_box;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod signals;
pub mod telemetry;
pub mod validators;

#[cfg(test)]
mod test_support;

pub use context::{
    ContextBuilder, ExecutionParams, MarketAnalysis, PositionSizing, PricesSummary, TradeConstraints,
    TradingContext,
};
pub use glass_box::{DecisionContext, GlassBoxData, GlassBoxEnricher, GlassBoxRecord, RunSummary};
pub use parser::{ParseError, ParseIssue, ParseOutput, ResponseParser};
pub use pipeline::{
    default_plan, PipelineError, PipelineOutput, RunFailure, SignalPipeline, StepMetadata, StepName, StepSpec,
    StepStatus,
};
pub use prompt::{ComposedPrompt, PromptComposer};
pub use signals::{
    ConfidenceFactor, Direction, InvalidTrade, NormalizedTrade, Severity, Threshold, TradeReasoning, TradeStatus,
    TradeWarnings, ValidationOutcome, ValidationResult,
};
pub use telemetry::{MemoryTelemetry, TelemetryEvent, TelemetryLevel, TelemetrySink, TracingTelemetry};
pub use validators::{BatchValidation, Check, TradeValidator, ValidatorChain};
