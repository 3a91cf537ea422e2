use crate::{
    error::Result,
    metrics,
    server::{context::RequestContext, state::AppState},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// Stream a media segment from upstream to the player
///
/// Validated like `/proxy`, but not cached, coalesced or retried.
pub async fn relay_segment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();

    let response = match open_upstream(&state, params.get("url").map(String::as_str)).await {
        Ok(upstream) => {
            let content_type = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("video/MP2T"));
            let content_length = upstream.content_length();

            let mut response = (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type)],
                Body::from_stream(upstream.bytes_stream()),
            )
                .into_response();
            if let Some(len) = content_length {
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
            response
        }
        Err(e) => ctx.fail(&e, state.expose_detail()),
    };

    metrics::record_request("segment", response.status().as_u16());
    metrics::record_duration("segment", start);
    response
}

async fn open_upstream(state: &AppState, target: Option<&str>) -> Result<reqwest::Response> {
    let url = state.gateway.validate_target(target)?;
    info!("Relaying segment {}", url);
    state.gateway.fetcher().relay(&url).await
}
