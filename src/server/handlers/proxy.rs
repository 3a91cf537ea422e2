use crate::{
    metrics,
    server::{context::RequestContext, state::AppState},
};
use axum::{
    extract::{Query, State},
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// Reports whether the body came from the result cache.
pub const CACHE_HEADER: &str = "x-cache";

/// Fetch, filter and rewrite the playlist named by `?url=`
pub async fn proxy_playlist(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let start = Instant::now();
    let target = params.get("url").map(String::as_str);
    info!("Proxy request from {} for {:?}", ctx.client_ip, target);

    let response = match state.gateway.handle(target, &ctx.client_ip).await {
        Ok(outcome) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
                (HeaderName::from_static(CACHE_HEADER), outcome.cache.as_str()),
            ],
            outcome.body.to_string(),
        )
            .into_response(),
        Err(e) => ctx.fail(&e, state.expose_detail()),
    };

    metrics::record_request("proxy", response.status().as_u16());
    metrics::record_duration("proxy", start);
    response
}
