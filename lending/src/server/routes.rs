//! Router configuration for the lending server.

use super::health::health_check;
use super::state::AppState;
use crate::api::{get_status, perform_action, run_escalations, submit_request};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `GET /health`
/// - `GET /status/:token` (the link sent to requesters)
/// - `POST /api/requests`
/// - `POST /api/requests/:id/actions`
/// - `GET /api/status/:token`
/// - `POST /api/stations/:id/escalations`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/requests", post(submit_request))
        .route("/requests/:id/actions", post(perform_action))
        .route("/status/:token", get(get_status))
        .route("/stations/:id/escalations", post(run_escalations));

    Router::new()
        .route("/health", get(health_check))
        .route("/status/:token", get(get_status))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
