use crate::hls::filter::{AdFilter, DEFAULT_PATTERNS};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

type ConfigResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Result cache settings.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    /// Maximum number of cached playlists
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size: 100,
        }
    }
}

/// Ad segment classification settings.
#[derive(Clone, Debug, PartialEq)]
pub struct AdFilterConfig {
    pub enabled: bool,
    /// Ordered patterns, `/body/flags` or bare regex
    pub patterns: Vec<String>,
}

impl Default for AdFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Inbound request guards.
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityConfig {
    /// Lowercase URL schemes accepted for targets
    pub allowed_protocols: Vec<String>,
    pub rate_limit_window: Duration,
    /// Requests per window per client; 0 disables rate limiting
    pub rate_limit_max: u32,
    /// Reject private and loopback IP literals as targets
    pub block_private_hosts: bool,
    /// Take the client identity from `X-Forwarded-For`; only safe behind a
    /// reverse proxy that overwrites the header
    pub trust_forwarded_for: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_protocols: vec!["http".to_string(), "https".to_string()],
            rate_limit_window: Duration::from_secs(900),
            rate_limit_max: 100,
            block_private_hosts: true,
            trust_forwarded_for: false,
        }
    }
}

/// Limits on upstream fetches.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamConfig {
    pub timeout: Duration,
    pub max_manifest_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            max_manifest_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Public origin of this proxy, used in rewritten playlist URIs
    pub base_url: String,
    pub is_dev: bool,
    /// Route media segments through `/segment` instead of pointing at upstream
    pub proxy_segments: bool,
    pub cache: CacheConfig,
    pub ad_filter: AdFilterConfig,
    pub security: SecurityConfig,
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT and BASE_URL are required.
    pub fn from_env() -> ConfigResult<Self> {
        let is_dev = flag("DEV_MODE", false)?;

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            parse_or("PORT", 3000)?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse::<u16>()
                .map_err(|e| format!("Invalid PORT: {e}"))?
        };

        // Base URL: required in prod, defaults to localhost in dev
        let base_url = if is_dev {
            env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
        } else {
            env::var("BASE_URL").map_err(|_| "BASE_URL is required in production")?
        };

        let cache = CacheConfig {
            enabled: flag("CACHE_ENABLED", true)?,
            ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", 300)?),
            max_size: parse_or("CACHE_MAX_SIZE", 100)?,
        };

        let ad_filter = AdFilterConfig {
            enabled: flag("AD_FILTER_ENABLED", true)?,
            patterns: match env::var("AD_FILTER_PATTERNS") {
                Ok(raw) => parse_patterns(&raw)?,
                Err(_) => AdFilterConfig::default().patterns,
            },
        };
        // Fail startup on a pattern that does not compile
        AdFilter::from_patterns(ad_filter.enabled, &ad_filter.patterns)?;

        let window_secs: u64 = parse_or("RATE_LIMIT_WINDOW_SECS", 900)?;
        if window_secs == 0 {
            return Err("RATE_LIMIT_WINDOW_SECS must be at least 1".into());
        }
        let security = SecurityConfig {
            allowed_protocols: match env::var("ALLOWED_PROTOCOLS") {
                Ok(raw) => parse_protocols(&raw)?,
                Err(_) => SecurityConfig::default().allowed_protocols,
            },
            rate_limit_window: Duration::from_secs(window_secs),
            rate_limit_max: parse_or("RATE_LIMIT_MAX", 100)?,
            // Dev setups commonly point at a local origin
            block_private_hosts: flag("BLOCK_PRIVATE_HOSTS", !is_dev)?,
            trust_forwarded_for: flag("TRUST_FORWARDED_FOR", false)?,
        };

        let timeout_ms: u64 = parse_or("UPSTREAM_TIMEOUT_MS", 10_000)?;
        if timeout_ms == 0 {
            return Err("UPSTREAM_TIMEOUT_MS must be at least 1".into());
        }
        let upstream = UpstreamConfig {
            timeout: Duration::from_millis(timeout_ms),
            max_manifest_bytes: parse_or("MAX_MANIFEST_BYTES", 5 * 1024 * 1024)?,
        };

        Ok(Config {
            port,
            base_url,
            is_dev,
            proxy_segments: flag("PROXY_SEGMENTS", false)?,
            cache,
            ad_filter,
            security,
            upstream,
        })
    }
}

/// Parse `name` if set, otherwise use `default`. A set but invalid value is an error.
fn parse_or<T>(name: &str, default: T) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => Ok(raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid {name} '{raw}': {e}"))?),
        Err(_) => Ok(default),
    }
}

fn flag(name: &str, default: bool) -> ConfigResult<bool> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("Invalid {name} '{raw}': expected true or false").into()),
    }
}

/// A JSON array of strings, or a comma-separated list.
///
/// Use the JSON form for regexes that contain commas, such as `{1,3}`.
fn parse_patterns(raw: &str) -> ConfigResult<Vec<String>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return Ok(serde_json::from_str(raw)
            .map_err(|e| format!("Invalid AD_FILTER_PATTERNS JSON: {e}"))?);
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect())
}

fn parse_protocols(raw: &str) -> ConfigResult<Vec<String>> {
    let protocols: Vec<String> = raw
        .split(',')
        .map(|p| p.trim().trim_end_matches(':').to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    if protocols.is_empty() {
        return Err("ALLOWED_PROTOCOLS must name at least one scheme".into());
    }
    Ok(protocols)
}
