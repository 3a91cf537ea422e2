//! Upstream playlist retrieval with single-flight coalescing.
//!
//! At most one upstream request runs per cache key. Concurrent callers for
//! the same key attach to the in-flight fetch and receive its outcome, so
//! a burst of viewers on one stream costs one origin round trip. The fetch
//! runs on its own task and resolves every waiter at once, including on
//! timeout; the slot is released as soon as it settles.
//!
//! Redirects are followed by the client. The outcome records the URL that
//! finally served the body, which is the base for relative URIs in it.

use crate::cache::cache_key;
use crate::error::{Result, SieveError};
use crate::metrics;
use crate::server::url_validation::check_scheme;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

type FetchOutcome = Result<FetchedPlaylist>;

/// Playlist text plus the URL it was served from after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPlaylist {
    pub url: Url,
    pub body: Arc<str>,
}

/// A fetch currently in progress for one key.
#[derive(Clone)]
struct InFlightFetch {
    id: u64,
    outcome: Shared<BoxFuture<'static, FetchOutcome>>,
}

/// Upstream limits applied to every fetch.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub allowed_schemes: Vec<String>,
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

#[derive(Clone)]
pub struct FetchCoordinator {
    client: Client,
    settings: Arc<FetchSettings>,
    in_flight: Arc<DashMap<String, InFlightFetch>>,
    next_id: Arc<AtomicU64>,
}

impl FetchCoordinator {
    pub fn new(client: Client, settings: FetchSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            in_flight: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Number of fetches currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Fetch the playlist text at `url`.
    ///
    /// # Errors
    /// - [`SieveError::Validation`] for a disallowed scheme, before any I/O,
    ///   or a redirect the client refused to follow
    /// - [`SieveError::Timeout`] when upstream does not answer in time
    /// - [`SieveError::Network`] when the connection fails
    /// - [`SieveError::NotFound`] for an upstream 404
    /// - [`SieveError::Proxy`] for other upstream statuses or oversized bodies
    /// - [`SieveError::Parse`] for a body that is not UTF-8
    pub async fn fetch(&self, url: &Url) -> FetchOutcome {
        check_scheme(url, &self.settings.allowed_schemes)?;

        let key = cache_key(url);
        let (flight, leader) = self.join(&key, url);
        if !leader {
            debug!("Joining in-flight fetch for {}", key);
            metrics::record_coalesced();
        }
        flight.outcome.await
    }

    /// Attach to the in-flight fetch for `key`, starting one if none exists.
    ///
    /// Returns the flight and whether this caller started it.
    fn join(&self, key: &str, url: &Url) -> (InFlightFetch, bool) {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(self.clone().run(key.to_string(), id, url.clone()));
                let outcome = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(SieveError::Internal(format!("fetch task failed: {e}")))
                    })
                }
                .boxed()
                .shared();

                let flight = InFlightFetch { id, outcome };
                slot.insert(flight.clone());
                (flight, true)
            }
        }
    }

    async fn run(self, key: String, id: u64, url: Url) -> FetchOutcome {
        debug!("Fetching upstream playlist {}", url);
        metrics::record_upstream_fetch();

        let timeout = self.settings.timeout;
        let outcome = match tokio::time::timeout(timeout, self.download(&url)).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(&url, timeout)),
        };

        // Release the slot before waiters observe the outcome
        self.in_flight.remove_if(&key, |_, flight| flight.id == id);

        match &outcome {
            Ok(fetched) if fetched.url != url => info!(
                "Fetched upstream playlist {} via {} ({} bytes)",
                url,
                fetched.url,
                fetched.body.len()
            ),
            Ok(fetched) => info!("Fetched upstream playlist {} ({} bytes)", url, fetched.body.len()),
            Err(e) => {
                warn!("Upstream fetch failed for {}: {}", url, e);
                metrics::record_upstream_error(e.code());
            }
        }
        outcome
    }

    async fn download(&self, url: &Url) -> FetchOutcome {
        let timeout = self.settings.timeout;
        let max = self.settings.max_body_bytes;

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(url, timeout, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SieveError::NotFound(format!(
                "Upstream playlist not found: {url}"
            )));
        }
        if !status.is_success() {
            return Err(SieveError::Proxy(format!(
                "Upstream returned {status} for {url}"
            )));
        }
        let served_from = response.url().clone();
        if let Some(len) = response.content_length()
            && len > max as u64
        {
            return Err(oversized(url, max));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(url, timeout, e))? {
            if body.len() + chunk.len() > max {
                return Err(oversized(url, max));
            }
            body.extend_from_slice(&chunk);
        }

        let body = String::from_utf8(body)
            .map_err(|_| SieveError::Parse(format!("Upstream playlist is not valid UTF-8: {url}")))?;
        Ok(FetchedPlaylist {
            url: served_from,
            body: Arc::from(body),
        })
    }

    /// Open a streaming upstream response for segment relaying.
    ///
    /// Not coalesced and not buffered; the deadline covers the response
    /// headers only.
    pub async fn relay(&self, url: &Url) -> Result<reqwest::Response> {
        check_scheme(url, &self.settings.allowed_schemes)?;

        let timeout = self.settings.timeout;
        let response = tokio::time::timeout(timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| timeout_error(url, timeout))?
            .map_err(|e| classify(url, timeout, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(SieveError::NotFound(format!("Upstream segment not found: {url}"))),
            status if !status.is_success() => Err(SieveError::Proxy(format!(
                "Upstream returned {status} for {url}"
            ))),
            _ => Ok(response),
        }
    }
}

fn timeout_error(url: &Url, timeout: Duration) -> SieveError {
    SieveError::Timeout {
        url: url.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

fn oversized(url: &Url, max: usize) -> SieveError {
    SieveError::Proxy(format!("Upstream playlist exceeds {max} bytes: {url}"))
}

fn classify(url: &Url, timeout: Duration, e: reqwest::Error) -> SieveError {
    if e.is_timeout() {
        timeout_error(url, timeout)
    } else if e.is_redirect() {
        let reason = std::error::Error::source(&e).map_or_else(|| e.to_string(), ToString::to_string);
        SieveError::Validation(format!("Upstream redirect from {url} refused: {reason}"))
    } else if e.is_body() || e.is_decode() {
        SieveError::Proxy(format!("Failed to read upstream body for {url}: {e}"))
    } else {
        SieveError::Network(format!("{url}: {e}"))
    }
}
