//! Error taxonomy shared by every stage of the proxy pipeline.
//!
//! Each variant maps to an HTTP status and a stable machine-readable code.
//! Errors are `Clone` because a single upstream outcome is handed to every
//! request coalesced onto the same in-flight fetch.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Message shown for internal-class failures outside of dev mode.
const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SieveError {
    #[error("{0}")]
    Validation(String),

    #[error("Too many requests, retry in {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream did not respond within {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Upstream connection failed: {0}")]
    Network(String),

    #[error("Upstream relay failed: {0}")]
    Proxy(String),

    #[error("Failed to parse playlist: {0}")]
    Parse(String),

    #[error("Cache operation failed: {0}")]
    Cache(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SieveError>;

/// Who is at fault for an error. Drives log level and detail exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Upstream,
    Data,
    Internal,
}

impl SieveError {
    /// Stable code surfaced in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Timeout { .. } => "UPSTREAM_TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Proxy(_) => "PROXY_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Network(_) | Self::Proxy(_) => StatusCode::BAD_GATEWAY,
            Self::Cache(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::RateLimit { .. } | Self::NotFound(_) => ErrorClass::Client,
            Self::Timeout { .. } | Self::Network(_) | Self::Proxy(_) => ErrorClass::Upstream,
            Self::Parse(_) => ErrorClass::Data,
            Self::Cache(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    ///
    /// The proxy itself never retries; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network(_) | Self::Proxy(_) | Self::RateLimit { .. }
        )
    }

    /// Message placed in the response body.
    ///
    /// Internal-class errors hide their detail unless `expose_detail` is set.
    pub fn public_message(&self, expose_detail: bool) -> String {
        if self.class() == ErrorClass::Internal && !expose_detail {
            return GENERIC_INTERNAL_MESSAGE.to_string();
        }
        self.to_string()
    }

    /// Render as a JSON error response.
    pub fn render(&self, expose_detail: bool) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(expose_detail),
                "status": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        });

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimit { retry_after_secs } = self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl IntoResponse for SieveError {
    fn into_response(self) -> Response {
        self.render(false)
    }
}
