//! Shared types for the signal generation workspace.
//!
//! - Pipeline input (strategy + run configuration) as supplied by the consumer
//! - Price quotes and feed metadata shared between ingestion and signal generation
//! - Pipeline settings loaded from TOML
//! - Tracing subscriber setup for binaries

pub mod config;
pub mod input;
pub mod logging;
pub mod market;

pub use config::{
    load_settings, save_settings, AiSettings, AnalysisSettings, ExchangeSettings,
    PipelineSettings, StepSettings, ValidationSettings,
};
pub use input::{ExecutionTime, InputError, PipelineInput, RunConfig, Strategy};
pub use market::{PriceFeedMetadata, PriceFeedOutput, PriceMap, PriceQuote};

pub use chrono::{DateTime, Utc};
