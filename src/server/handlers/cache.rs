use crate::server::{context::RequestContext, state::AppState};
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;

pub async fn cache_stats(State(state): State<AppState>, ctx: RequestContext) -> Response {
    match state.gateway.cache().stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => ctx.fail(&e, state.expose_detail()),
    }
}

pub async fn clear_cache(State(state): State<AppState>, ctx: RequestContext) -> Response {
    match state.gateway.cache().clear() {
        Ok(()) => {
            info!("Result cache cleared by {}", ctx.client_ip);
            Json(json!({ "status": "ok", "message": "cache cleared" })).into_response()
        }
        Err(e) => ctx.fail(&e, state.expose_detail()),
    }
}
