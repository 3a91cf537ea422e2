//! Bounded TTL cache of processed playlists.
//!
//! Entries expire lazily: a lookup that finds an entry older than the TTL
//! removes it and reports a miss. When full, the entry inserted first is
//! evicted (FIFO, not LRU). Reads share the lock; inserts, evictions and
//! clears take it exclusively.

use crate::error::{Result, SieveError};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Derive the cache key for an upstream playlist URL.
///
/// `Url` serialization already lowercases scheme and host and drops default
/// ports; the fragment is never sent upstream so it is dropped too.
pub fn cache_key(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.into()
}

/// A cached playlist body.
#[derive(Clone, Debug)]
struct CachedEntry {
    body: Arc<str>,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, CachedEntry>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<String>,
}

impl Store {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some()
            && let Some(pos) = self.order.iter().position(|k| k == key)
        {
            self.order.remove(pos);
        }
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self.order.pop_front()?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// Read-only snapshot returned by `/cache/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_size: usize,
    /// TTL in seconds.
    pub ttl: u64,
}

/// Thread-safe playlist cache with TTL expiry and FIFO capacity eviction.
#[derive(Clone, Debug)]
pub struct ResultCache {
    store: Arc<RwLock<Store>>,
    enabled: bool,
    ttl: Duration,
    max_size: usize,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl: Duration, max_size: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            enabled,
            ttl,
            max_size,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| SieveError::Cache("cache lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| SieveError::Cache("cache lock poisoned".to_string()))
    }

    fn is_expired(&self, entry: &CachedEntry) -> bool {
        entry.inserted_at.elapsed() > self.ttl
    }

    /// Fresh body for `key`, if any.
    ///
    /// An expired entry is removed as a side effect and reported as absent.
    pub fn get(&self, key: &str) -> Result<Option<Arc<str>>> {
        if !self.enabled {
            return Ok(None);
        }

        {
            let store = self.read()?;
            match store.entries.get(key) {
                Some(entry) if !self.is_expired(entry) => {
                    debug!("Result cache HIT for {}", key);
                    return Ok(Some(entry.body.clone()));
                }
                Some(_) => {}
                None => {
                    debug!("Result cache MISS for {}", key);
                    return Ok(None);
                }
            }
        }

        // Stale: re-check under the write lock, a concurrent set may have refreshed it
        let mut store = self.write()?;
        if let Some(entry) = store.entries.get(key) {
            if !self.is_expired(entry) {
                return Ok(Some(entry.body.clone()));
            }
            store.remove(key);
            debug!("Result cache EXPIRED for {}", key);
        }
        Ok(None)
    }

    /// Store `body` under `key` with the current timestamp.
    ///
    /// Overwriting a key restarts its residence, so it moves to the back of
    /// the eviction queue.
    pub fn set(&self, key: &str, body: Arc<str>) -> Result<()> {
        if !self.enabled || self.max_size == 0 {
            return Ok(());
        }

        let mut store = self.write()?;
        if store.entries.contains_key(key) {
            store.remove(key);
        } else if store.entries.len() >= self.max_size
            && let Some(evicted) = store.evict_oldest()
        {
            debug!("Result cache full, evicted {}", evicted);
        }

        store.order.push_back(key.to_string());
        store.entries.insert(
            key.to_string(),
            CachedEntry {
                body,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Remove every entry. Idempotent.
    pub fn clear(&self) -> Result<()> {
        let mut store = self.write()?;
        store.entries.clear();
        store.order.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            enabled: self.enabled,
            size: self.len()?,
            max_size: self.max_size,
            ttl: self.ttl.as_secs(),
        })
    }
}
