//! Ride lifecycle endpoints.
//!
//! Every state-changing endpoint returns the current ride summary; errors
//! carry the engine's stable codes (`RIDE_ALREADY_ACCEPTED`, `INVALID_STATE`,
//! `UNAUTHORIZED_DRIVER`, `CANNOT_CANCEL`, `SERVICE_UNAVAILABLE`).

use crate::error::AppError;
use crate::extractors::{IdempotencyKey, TenantId};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rideflow_core::RideId;
use rideflow_dispatch::{RideRequest, RideSummary};
use serde::Deserialize;
use uuid::Uuid;

/// `driverId` query parameter.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverParam {
    driver_id: String,
}

/// `requesterId` query parameter.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterParam {
    requester_id: String,
}

/// `POST /api/v1/rides`
pub async fn create_ride(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    IdempotencyKey(idempotency_key): IdempotencyKey,
    Json(request): Json<RideRequest>,
) -> Result<(StatusCode, Json<RideSummary>), AppError> {
    let summary = state
        .engine
        .create_ride(&tenant_id, request, idempotency_key)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// `GET /api/v1/rides/{ride_id}`
pub async fn get_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideSummary>, AppError> {
    let summary = state.engine.get(RideId::from_uuid(ride_id)).await?;
    Ok(Json(summary))
}

/// `POST /api/v1/rides/{ride_id}/accept?driverId=…`
pub async fn accept_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
    Query(params): Query<DriverParam>,
) -> Result<Json<RideSummary>, AppError> {
    let summary = state
        .engine
        .accept(RideId::from_uuid(ride_id), &params.driver_id)
        .await?;
    Ok(Json(summary))
}

/// `POST /api/v1/rides/{ride_id}/decline?driverId=…`
pub async fn decline_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
    Query(params): Query<DriverParam>,
) -> Result<Json<RideSummary>, AppError> {
    let summary = state
        .engine
        .decline(RideId::from_uuid(ride_id), &params.driver_id)
        .await?;
    Ok(Json(summary))
}

/// `POST /api/v1/rides/{ride_id}/driver-arrived?driverId=…`
pub async fn driver_arrived(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
    Query(params): Query<DriverParam>,
) -> Result<Json<RideSummary>, AppError> {
    let summary = state
        .engine
        .driver_arrived(RideId::from_uuid(ride_id), &params.driver_id)
        .await?;
    Ok(Json(summary))
}

/// `POST /api/v1/rides/{ride_id}/start?driverId=…`
pub async fn start_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
    Query(params): Query<DriverParam>,
) -> Result<Json<RideSummary>, AppError> {
    let summary = state
        .engine
        .start(RideId::from_uuid(ride_id), &params.driver_id)
        .await?;
    Ok(Json(summary))
}

/// `POST /api/v1/rides/{ride_id}/cancel?requesterId=…`
pub async fn cancel_ride(
    State(state): State<AppState>,
    Path(ride_id): Path<Uuid>,
    Query(params): Query<RequesterParam>,
) -> Result<Json<RideSummary>, AppError> {
    let summary = state
        .engine
        .cancel(RideId::from_uuid(ride_id), &params.requester_id)
        .await?;
    Ok(Json(summary))
}
