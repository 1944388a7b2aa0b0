//! Router assembly.

use crate::handlers::health::{health_check, readiness_check};
use crate::handlers::{rides, surge};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the service router: health probes plus the versioned API.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/rides", post(rides::create_ride))
        .route("/rides/{ride_id}", get(rides::get_ride))
        .route("/rides/{ride_id}/accept", post(rides::accept_ride))
        .route("/rides/{ride_id}/decline", post(rides::decline_ride))
        .route("/rides/{ride_id}/driver-arrived", post(rides::driver_arrived))
        .route("/rides/{ride_id}/start", post(rides::start_ride))
        .route("/rides/{ride_id}/cancel", post(rides::cancel_ride))
        .route("/surge", get(surge::get_by_location))
        .route("/surge/{cell_id}", get(surge::get_by_cell));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
