use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Binaries call this once at startup;
/// library crates only emit events.
///
/// `RUST_LOG` wins when set, otherwise `default_level` (e.g. `"info"`) applies
/// with the HTTP stack quietened to warnings.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{default_level},hyper=warn,reqwest=warn"))
    });

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
