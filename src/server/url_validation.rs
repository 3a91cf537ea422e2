use crate::config::SecurityConfig;
use crate::error::{Result, SieveError};
use reqwest::redirect;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Upper bound on redirect hops followed for one upstream request.
const MAX_REDIRECTS: usize = 10;

/// Rules a client-supplied target URL must satisfy before anything is fetched.
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    /// Lowercase scheme names, without the trailing colon.
    pub allowed_schemes: Vec<String>,
    /// Reject IP-literal hosts in loopback, private and link-local ranges.
    pub block_private_hosts: bool,
}

impl From<&SecurityConfig> for TargetPolicy {
    fn from(security: &SecurityConfig) -> Self {
        Self {
            allowed_schemes: security.allowed_protocols.clone(),
            block_private_hosts: security.block_private_hosts,
        }
    }
}

impl TargetPolicy {
    /// Redirect policy for the upstream client: every hop must pass
    /// [`TargetPolicy::validate`] like the original target did.
    pub fn redirect_policy(&self) -> redirect::Policy {
        let policy = self.clone();
        redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
            }
            match policy.validate(Some(attempt.url().as_str())) {
                Ok(_) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        })
    }

    /// Parse and validate a target URL from the `url` query parameter.
    ///
    /// **Hostnames** are accepted without DNS resolution, so a public name
    /// that resolves to a private address is not caught here.
    ///
    /// # Errors
    /// Returns [`SieveError::Validation`] for:
    /// - a missing or blank value
    /// - relative or unparsable URLs, or URLs without a host
    /// - schemes outside `allowed_schemes`
    /// - blocked IP literals when `block_private_hosts` is set
    pub fn validate(&self, raw: Option<&str>) -> Result<Url> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(SieveError::Validation(
                "Missing required parameter: url".to_string(),
            ));
        }

        let url = Url::parse(raw)
            .map_err(|e| SieveError::Validation(format!("Invalid URL '{raw}': {e}")))?;
        check_scheme(&url, &self.allowed_schemes)?;

        let host = url
            .host()
            .ok_or_else(|| SieveError::Validation(format!("No host in URL: {raw}")))?;

        if self.block_private_hosts {
            let blocked = match host {
                Host::Ipv4(ip) => is_blocked_ipv4(ip),
                Host::Ipv6(ip) => is_blocked_ipv6(ip),
                Host::Domain(_) => false,
            };
            if blocked {
                return Err(SieveError::Validation(format!(
                    "Private or reserved address not allowed: {host}"
                )));
            }
        }

        Ok(url)
    }
}

/// Fail unless the URL scheme is one of `allowed`.
pub fn check_scheme(url: &Url, allowed: &[String]) -> Result<()> {
    let scheme = url.scheme();
    if allowed.iter().any(|s| s == scheme) {
        return Ok(());
    }
    Err(SieveError::Validation(format!(
        "Scheme '{scheme}' not allowed, permitted: {}",
        allowed.join(", ")
    )))
}

/// Loopback, RFC 1918, link-local (cloud metadata) and `0.0.0.0/8`.
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.octets()[0] == 0
}

/// Loopback, unspecified, `fe80::/10`, `fc00::/7`, and IPv4-mapped forms of
/// blocked IPv4 addresses.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback() || ip.is_unspecified() || (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
}
