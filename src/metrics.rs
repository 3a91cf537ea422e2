//! Prometheus metrics for the proxy.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`install`] has run, so library users and unit tests pay nothing.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder once per process.
///
/// Returns `None` when another recorder was installed first.
pub fn install() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

/// Render the text exposition format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.run_upkeep();
    handle.render()
}

pub fn record_request(endpoint: &'static str, status: u16) {
    metrics::counter!(
        "adsieve_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_duration(endpoint: &'static str, start: Instant) {
    metrics::histogram!("adsieve_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_hit() {
    metrics::counter!("adsieve_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    metrics::counter!("adsieve_cache_misses_total").increment(1);
}

pub fn record_upstream_fetch() {
    metrics::counter!("adsieve_upstream_fetches_total").increment(1);
}

/// `kind` is the error code, e.g. `UPSTREAM_TIMEOUT`.
pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("adsieve_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_coalesced() {
    metrics::counter!("adsieve_coalesced_waiters_total").increment(1);
}

pub fn record_ads_removed(count: usize) {
    if count > 0 {
        metrics::counter!("adsieve_ad_segments_removed_total").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request("proxy", 200);
        record_duration("proxy", Instant::now());
        record_cache_hit();
        record_cache_miss();
        record_upstream_fetch();
        record_upstream_error("NETWORK_ERROR");
        record_coalesced();
        record_ads_removed(3);
    }

    #[test]
    fn install_is_idempotent() {
        let first = install();
        let second = install();
        assert_eq!(first.is_some(), second.is_some());

        if let Some(handle) = first {
            record_ads_removed(2);
            let text = render(&handle);
            assert!(text.contains("adsieve_ad_segments_removed_total"));
        }
    }
}
