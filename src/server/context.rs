//! Request context attached to every logged error.

use crate::error::{ErrorClass, SieveError};
use crate::server::state::AppState;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{Method, request::Parts},
    response::Response,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, warn};

/// Method, path and originating client of the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Rate-limit identity: the peer address, or the first `X-Forwarded-For`
    /// hop when the proxy is configured to trust that header
    pub client_ip: String,
}

impl RequestContext {
    /// Log `e` with this request's context and render it as a JSON response.
    pub fn fail(&self, e: &SieveError, expose_detail: bool) -> Response {
        match e.class() {
            ErrorClass::Client => warn!(
                method = %self.method,
                path = %self.path,
                client_ip = %self.client_ip,
                code = e.code(),
                "{}",
                e
            ),
            _ => error!(
                method = %self.method,
                path = %self.path,
                client_ip = %self.client_ip,
                code = e.code(),
                "{}",
                e
            ),
        }
        e.render(expose_detail)
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            client_ip: client_ip(parts, state.config.security.trust_forwarded_for),
        })
    }
}

fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    // Behind a trusted reverse proxy, the first X-Forwarded-For hop is the client
    if trust_forwarded_for
        && let Some(forwarded) = parts.headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
    {
        let ip = first_ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    // Otherwise only the socket peer can be believed
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdFilterConfig, CacheConfig, Config, SecurityConfig, UpstreamConfig};
    use axum::http::Request;

    fn state(trust_forwarded_for: bool) -> AppState {
        AppState::new(Config {
            port: 0,
            base_url: "http://proxy.test".to_string(),
            is_dev: true,
            proxy_segments: false,
            cache: CacheConfig::default(),
            ad_filter: AdFilterConfig::default(),
            security: SecurityConfig {
                trust_forwarded_for,
                ..SecurityConfig::default()
            },
            upstream: UpstreamConfig::default(),
        })
        .unwrap()
    }

    fn request(forwarded: Option<&str>, peer: Option<[u8; 4]>) -> Request<()> {
        let mut builder = Request::builder().uri("/proxy?url=x");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(()).unwrap();
        if let Some(ip) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((ip, 5555))));
        }
        req
    }

    async fn context(req: Request<()>, state: &AppState) -> RequestContext {
        let (mut parts, _) = req.into_parts();
        RequestContext::from_request_parts(&mut parts, state).await.unwrap()
    }

    #[tokio::test]
    async fn trusted_forwarded_for_takes_first_hop() {
        let req = request(Some(" 203.0.113.9 , 10.0.0.1"), Some([192, 0, 2, 7]));
        let ctx = context(req, &state(true)).await;
        assert_eq!(ctx.client_ip, "203.0.113.9");
        assert_eq!(ctx.path, "/proxy");
        assert_eq!(ctx.method, Method::GET);
    }

    #[tokio::test]
    async fn forwarded_for_ignored_unless_trusted() {
        let req = request(Some("203.0.113.9"), Some([192, 0, 2, 7]));
        assert_eq!(context(req, &state(false)).await.client_ip, "192.0.2.7");
    }

    #[tokio::test]
    async fn falls_back_to_peer_address() {
        let req = request(None, Some([192, 0, 2, 7]));
        assert_eq!(context(req, &state(true)).await.client_ip, "192.0.2.7");
    }

    #[tokio::test]
    async fn unknown_without_any_source() {
        let req = request(Some("203.0.113.9"), None);
        assert_eq!(context(req, &state(false)).await.client_ip, "unknown");
    }
}
