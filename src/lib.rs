//! Caching HLS playlist proxy that strips ad segments.
//!
//! Requests to `/proxy?url=` fetch an upstream playlist (one upstream call
//! per URL however many clients ask at once), drop entries whose URIs match
//! the configured ad patterns, rewrite the remaining URIs and cache the
//! result for a bounded time.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod hls;
pub mod metrics;
pub mod server;
