//! HTTP router of the daemon.
//!
//! - POST /events                           — export events
//! - POST /resync                           — manual resync
//! - GET  /status                           — phase and last run
//! - GET  /entitlements/:unit_id/:app_code  — entitlement lookup
//! - GET  /health                           — liveness

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(handlers::receive_event))
        .route("/resync", post(handlers::resync))
        .route("/status", get(handlers::status))
        .route(
            "/entitlements/:unit_id/:app_code",
            get(handlers::lookup_entitlement),
        )
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
