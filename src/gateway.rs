//! Per-request proxy pipeline.
//!
//! `Validating → RateChecking → CacheLookup → (Fetching → Parsing →
//! Filtering → Caching)`, after which the handler responds with the
//! serialized playlist. Any stage may fail; the failure carries that stage's
//! error kind and nothing is written to the cache.

use crate::cache::{ResultCache, cache_key};
use crate::config::Config;
use crate::error::{Result, SieveError};
use crate::fetch::{FetchCoordinator, FetchSettings};
use crate::hls::{AdFilter, RewritePolicy, parser, rewrite};
use crate::metrics;
use crate::server::rate_limit::RateLimiter;
use crate::server::url_validation::TargetPolicy;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Pipeline stage that can fail, used to attribute failures in logs.
///
/// Filtering and rewriting are infallible and have no stage of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    RateChecking,
    CacheLookup,
    Fetching,
    Parsing,
    Caching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::RateChecking => "rate-checking",
            Stage::CacheLookup => "cache-lookup",
            Stage::Fetching => "fetching",
            Stage::Parsing => "parsing",
            Stage::Caching => "caching",
        };
        f.write_str(name)
    }
}

/// How the response body was obtained, reported in `X-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Cache disabled; always recomputed
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Successful result of one proxy request.
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    pub body: Arc<str>,
    pub cache: CacheStatus,
    /// Ad entries removed; zero on a cache hit
    pub removed: usize,
}

/// Owns the shared pipeline components. Cheap to clone.
#[derive(Clone)]
pub struct ProxyGateway {
    cache: ResultCache,
    fetcher: FetchCoordinator,
    filter: AdFilter,
    rewrite: RewritePolicy,
    targets: TargetPolicy,
    /// `None` when rate limiting is disabled
    limiter: Option<RateLimiter>,
}

impl ProxyGateway {
    pub fn from_config(config: &Config, client: Client) -> Result<Self> {
        let cache = ResultCache::new(
            config.cache.enabled,
            config.cache.ttl,
            config.cache.max_size,
        );
        let fetcher = FetchCoordinator::new(
            client,
            FetchSettings {
                allowed_schemes: config.security.allowed_protocols.clone(),
                timeout: config.upstream.timeout,
                max_body_bytes: config.upstream.max_manifest_bytes,
            },
        );
        let filter = AdFilter::from_patterns(config.ad_filter.enabled, &config.ad_filter.patterns)?;
        let targets = TargetPolicy::from(&config.security);
        let limiter = (config.security.rate_limit_max > 0).then(|| {
            RateLimiter::new(
                config.security.rate_limit_max,
                config.security.rate_limit_window,
            )
        });

        Ok(Self {
            cache,
            fetcher,
            filter,
            rewrite: RewritePolicy::new(&config.base_url, config.proxy_segments),
            targets,
            limiter,
        })
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn fetcher(&self) -> &FetchCoordinator {
        &self.fetcher
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Validate a client-supplied target URL.
    pub fn validate_target(&self, raw: Option<&str>) -> Result<Url> {
        self.targets.validate(raw)
    }

    /// Run the full pipeline for `target` on behalf of `client`.
    pub async fn handle(&self, target: Option<&str>, client: &str) -> Result<ProxyOutcome> {
        let url = self
            .validate_target(target)
            .map_err(|e| failed(Stage::Validating, e))?;

        if let Some(limiter) = &self.limiter {
            limiter
                .check(client)
                .map_err(|e| failed(Stage::RateChecking, e))?;
        }

        let key = cache_key(&url);
        let status = if self.cache.is_enabled() {
            if let Some(body) = self
                .cache
                .get(&key)
                .map_err(|e| failed(Stage::CacheLookup, e))?
            {
                metrics::record_cache_hit();
                debug!("Serving cached playlist for {}", key);
                return Ok(ProxyOutcome {
                    body,
                    cache: CacheStatus::Hit,
                    removed: 0,
                });
            }
            metrics::record_cache_miss();
            CacheStatus::Miss
        } else {
            CacheStatus::Bypass
        };

        let fetched = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| failed(Stage::Fetching, e))?;

        let manifest = parser::parse(&fetched.body).map_err(|e| failed(Stage::Parsing, e))?;

        let before = manifest.segment_count();
        let filtered = self.filter.apply(manifest);
        let removed = before.saturating_sub(filtered.segment_count());
        metrics::record_ads_removed(removed);

        // Relative URIs resolve against where the body was actually served from
        let rewritten = rewrite(filtered, &fetched.url, &self.rewrite);
        let body: Arc<str> = Arc::from(parser::serialize(&rewritten));

        self.cache
            .set(&key, body.clone())
            .map_err(|e| failed(Stage::Caching, e))?;

        info!(
            "Proxied {} ({} ad segments removed, cache {})",
            url,
            removed,
            status.as_str()
        );
        Ok(ProxyOutcome {
            body,
            cache: status,
            removed,
        })
    }
}

/// Record the stage a failure happened in. The handler logs the error itself.
fn failed(stage: Stage, e: SieveError) -> SieveError {
    debug!(stage = %stage, code = e.code(), "Proxy pipeline stopped: {}", e);
    e
}
