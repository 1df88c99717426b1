// signal-gen: run one strategy through the signal pipeline and print the
// result as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ai_providers::AiClient;
use anyhow::Context;
use clap::Parser;
use common::{load_settings, PipelineInput, PipelineSettings, RunConfig};
use data_ingestion::{BinanceConnector, PriceFeedClient};
use signal_generation::SignalPipeline;
use tracing::{error, info};

/// Environment variables holding provider API keys
const API_KEY_VARS: [(&str, &str); 6] = [
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
];

#[derive(Debug, Parser)]
#[command(name = "signal-gen", version, about = "Generate validated trade signals from a strategy")]
struct Args {
    /// Pipeline settings (TOML); defaults apply when omitted
    #[arg(long, env = "SIGNAL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Pipeline input: {"strategy": {...}, "config": {...}}
    input: PathBuf,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    common::logging::init_tracing("info");

    let args = Args::parse();
    match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => PipelineSettings::default(),
    };

    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read pipeline input {}", args.input.display()))?;
    let mut input: PipelineInput = serde_json::from_str(&raw)
        .with_context(|| format!("invalid pipeline input {}", args.input.display()))?;
    merge_env_api_keys(&mut input.config, |var| std::env::var(var).ok());

    let exchange_timeout = Duration::from_secs(settings.exchange.request_timeout_secs);
    let connector = BinanceConnector::new(&settings.exchange.base_url, exchange_timeout)?;
    let feed = PriceFeedClient::new(connector, settings.exchange.stats_top_n, exchange_timeout);
    let ai = AiClient::from_settings(&settings.ai);
    let pipeline = SignalPipeline::new(&settings, Arc::new(feed), ai)?;

    info!(
        strategy = %input.strategy.id,
        provider = %input.config.ai_provider,
        "Running signal pipeline"
    );

    match pipeline.run(input).await {
        Ok(output) => {
            print_json(&output, args.pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            error!("{}", failure);
            print_json(&failure, args.pretty)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

/// Fill in provider keys from the environment. Keys already in the input win.
fn merge_env_api_keys(config: &mut RunConfig, lookup: impl Fn(&str) -> Option<String>) {
    for (provider, var) in API_KEY_VARS {
        if config.api_keys.get(provider).is_some_and(|k| !k.trim().is_empty()) {
            continue;
        }
        if let Some(key) = lookup(var).filter(|k| !k.trim().is_empty()) {
            config.api_keys.insert(provider.to_string(), key);
        }
    }
}
