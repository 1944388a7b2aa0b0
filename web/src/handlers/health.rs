//! Liveness and readiness endpoints.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Health body.
#[derive(Serialize)]
pub struct Health {
    status: &'static str,
}

/// Liveness: the process is up.
pub async fn health_check() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// Readiness: the router is wired and serving.
pub async fn readiness_check() -> (StatusCode, Json<Health>) {
    (StatusCode::OK, Json(Health { status: "ready" }))
}
