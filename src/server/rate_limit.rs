//! Per-client rate limiting.
//!
//! Fixed-window counter using DashMap. Each client identity gets `limit`
//! requests per window; the counter resets once the window has elapsed.

use crate::error::{Result, SieveError};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-client fixed-window rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Counters per client: (request_count, window_start)
    counters: Arc<DashMap<String, (u32, Instant)>>,
    /// Max requests per window
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `client` against its current window.
    ///
    /// Fails with a rate-limit error carrying the seconds until the window
    /// resets once the budget is spent.
    pub fn check(&self, client: &str) -> Result<()> {
        let now = Instant::now();
        let mut entry = self.counters.entry(client.to_string()).or_insert((0, now));

        // Reset window if expired
        if now.duration_since(entry.1) >= self.window {
            entry.0 = 0;
            entry.1 = now;
        }

        entry.0 = entry.0.saturating_add(1);
        if entry.0 <= self.limit {
            return Ok(());
        }

        let remaining = self.window.saturating_sub(now.duration_since(entry.1));
        let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        warn!("Rate limit exceeded for client: {}", client);
        Err(SieveError::RateLimit { retry_after_secs })
    }

    /// Remove windows that have already expired.
    pub fn cleanup(&self) {
        self.counters
            .retain(|_, (_, window_start)| window_start.elapsed() < self.window);
    }

    /// Sweep expired windows once per window length until `shutdown` fires.
    pub fn spawn_cleanup(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.window);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        limiter.cleanup();
                        debug!("Rate limiter tracking {} clients", limiter.counters.len());
                    }
                }
            }
        })
    }
}
