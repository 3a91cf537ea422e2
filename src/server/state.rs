use crate::{
    config::Config, error::SieveError, gateway::ProxyGateway, metrics,
    server::url_validation::TargetPolicy,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Cache, fetch coordinator, filter and limiter for `/proxy`
    pub gateway: ProxyGateway,
    /// Prometheus exporter; `None` when another recorder owns the process
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self, SieveError> {
        // The per-fetch deadline is enforced by the fetch coordinator.
        // Redirect hops are held to the same target rules as `?url=`.
        let http_client = Client::builder()
            .redirect(TargetPolicy::from(&config.security).redirect_policy())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(config.upstream.timeout)
            .user_agent(concat!("adsieve/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SieveError::Internal(format!("Failed to create HTTP client: {e}")))?;

        let gateway = ProxyGateway::from_config(&config, http_client)?;

        Ok(Self {
            config: Arc::new(config),
            gateway,
            metrics: metrics::install(),
            started_at: Instant::now(),
        })
    }

    /// Whether error bodies may include internal detail.
    pub fn expose_detail(&self) -> bool {
        self.config.is_dev
    }
}
