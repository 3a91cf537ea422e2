pub mod cache;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod segment;

use crate::{error::SieveError, server::context::RequestContext};
use axum::response::Response;

/// Fallback for unknown routes.
pub async fn not_found(ctx: RequestContext) -> Response {
    let e = SieveError::NotFound(format!("Route not found: {} {}", ctx.method, ctx.path));
    ctx.fail(&e, false)
}
