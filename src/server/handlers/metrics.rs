use crate::{
    error::SieveError,
    metrics,
    server::{context::RequestContext, state::AppState},
};
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// Prometheus text exposition
pub async fn export_metrics(State(state): State<AppState>, ctx: RequestContext) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => ctx.fail(
            &SieveError::NotFound("Metrics exporter is not installed".to_string()),
            state.expose_detail(),
        ),
    }
}
