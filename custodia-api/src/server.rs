//! Shared axum server-building helpers for the operator-facing HTTP surface
//! (section 6, section 10.4).

use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Wraps `router` with the workspace's standard middleware stack (currently
/// just request tracing; HTTP-signature auth is applied per-route since it
/// needs access to the raw request body for the `digest` header).
pub fn with_standard_layers(router: Router) -> Router {
    router.layer(TraceLayer::new_for_http())
}

/// Binds and serves `router` on `addr` until the process is killed.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
) -> Result<(), std::io::Error> {
    tracing::info!(%addr, "starting operator HTTP surface");
    axum_server::bind(addr)
        .serve(router.into_make_service())
        .await
}
