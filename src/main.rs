use adsieve::{config::Config, server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Setup logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting adsieve - HLS ad-filtering proxy");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running in {} mode", if config.is_dev { "DEV" } else { "PROD" });
    info!(
        "Cache {} (ttl {}s, max {}), ad filter {} ({} patterns)",
        if config.cache.enabled { "on" } else { "off" },
        config.cache.ttl.as_secs(),
        config.cache.max_size,
        if config.ad_filter.enabled { "on" } else { "off" },
        config.ad_filter.patterns.len()
    );

    if let Err(e) = server::start(config).await {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }
}
