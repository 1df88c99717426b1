use common::{load_settings, PipelineSettings};
use data_ingestion::{default_assets, BinanceConnector, PriceFeedClient};
use std::time::Duration;
use tracing::info;

// Live check against the exchange REST API.
// Run with: cargo run --bin fetch_prices -- BTC/USDT ETH/USDT
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init_tracing("info");

    let settings = match std::env::var("SIGNAL_SETTINGS") {
        Ok(path) => load_settings(path)?,
        Err(_) => PipelineSettings::default(),
    };

    let mut assets: Vec<String> = std::env::args().skip(1).collect();
    if assets.is_empty() {
        assets = default_assets();
    }

    let timeout = Duration::from_secs(settings.exchange.request_timeout_secs);
    let connector = BinanceConnector::new(&settings.exchange.base_url, timeout)?;
    let feed = PriceFeedClient::new(connector, settings.exchange.stats_top_n, timeout);

    info!("Fetching {} assets from {}", assets.len(), settings.exchange.base_url);
    let output = feed.fetch(&assets).await?;

    for quote in output.prices.values() {
        info!(
            symbol = %quote.symbol,
            price = %quote.price,
            change_pct = ?quote.change_percent_24h,
            quote_volume = ?quote.quote_volume_24h,
            "quote"
        );
    }
    if !output.metadata.missing_assets.is_empty() {
        info!(missing = ?output.metadata.missing_assets, "Not listed");
    }
    info!("Done in {}ms", output.metadata.latency_ms);

    Ok(())
}
