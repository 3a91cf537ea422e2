pub mod context;
pub mod handlers;
pub mod rate_limit;
pub mod state;
pub mod url_validation;

use crate::{config::Config, error::SieveError};
use axum::{
    Router,
    http::{HeaderName, HeaderValue},
    response::Response,
    routing::get,
};
use state::AppState;
use std::any::Any;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

/// Header carrying the running version on every response.
pub const VERSION_HEADER: &str = "x-adsieve-version";

/// Build the router for `config` with fresh shared state.
pub fn build_router(config: Config) -> Result<Router, SieveError> {
    Ok(router(AppState::new(config)?))
}

/// Assemble routes and middleware around existing state.
pub fn router(state: AppState) -> Router {
    let expose_detail = state.expose_detail();

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/proxy", get(handlers::proxy::proxy_playlist))
        .route("/segment", get(handlers::segment::relay_segment))
        .route("/cache/stats", get(handlers::cache::cache_stats))
        .route("/cache/clear", get(handlers::cache::clear_cache))
        .route("/metrics", get(handlers::metrics::export_metrics))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            render_panic(panic, expose_detail)
        }))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn render_panic(panic: Box<dyn Any + Send + 'static>, expose_detail: bool) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!("Handler panicked: {}", detail);
    SieveError::Internal(format!("Handler panicked: {detail}")).render(expose_detail)
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    // Create shared application state
    let state = AppState::new(config)?;

    let shutdown = CancellationToken::new();
    let cleanup = state
        .gateway
        .limiter()
        .map(|limiter| limiter.spawn_cleanup(shutdown.clone()));

    let app = router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Server listening on http://{}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    shutdown.cancel();
    if let Some(handle) = cleanup
        && let Err(e) = handle.await
    {
        error!("Rate limiter cleanup task failed: {}", e);
    }

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
