//! Symbol translation between the internal `BASE/QUOTE` form and the exchange form

/// Assets used when a run does not name any
pub const DEFAULT_ASSETS: &[&str] = &[
    "BTC/USDT",
    "ETH/USDT",
    "BNB/USDT",
    "SOL/USDT",
    "XRP/USDT",
    "ADA/USDT",
    "AVAX/USDT",
    "DOGE/USDT",
    "DOT/USDT",
    "LINK/USDT",
];

pub fn default_assets() -> Vec<String> {
    DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

/// Canonical internal form: trimmed, upper-case
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// `BTC/USDT` -> `BTCUSDT`. Already concatenated symbols pass through.
pub fn to_exchange_symbol(symbol: &str) -> String {
    normalize_symbol(symbol)
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .collect()
}

/// Normalise and de-duplicate a requested asset list, keeping first-seen order
pub fn normalize_assets(assets: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    assets
        .iter()
        .map(|a| normalize_symbol(a))
        .filter(|a| !a.is_empty())
        .filter(|a| seen.insert(a.clone()))
        .collect()
}
