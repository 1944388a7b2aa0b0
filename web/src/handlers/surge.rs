//! Surge read endpoints.

use crate::error::AppError;
use crate::extractors::TenantId;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use rideflow_core::geo;
use serde::{Deserialize, Serialize};

/// Surge lookup response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeResponse {
    /// H3 cell the multiplier applies to.
    pub geo_cell: String,
    /// Echoed latitude, for the location endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Echoed longitude, for the location endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Current multiplier, within `[1.0, 3.0]`.
    pub surge_multiplier: f64,
}

/// `lat`/`lng` query parameters.
#[derive(Deserialize)]
pub struct LocationParams {
    lat: f64,
    lng: f64,
}

/// `GET /api/v1/surge/{cell_id}`
pub async fn get_by_cell(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(cell_id): Path<String>,
) -> Result<Json<SurgeResponse>, AppError> {
    let multiplier = state.surge.get(&tenant_id, &cell_id).await?;
    Ok(Json(SurgeResponse {
        geo_cell: cell_id,
        latitude: None,
        longitude: None,
        surge_multiplier: multiplier,
    }))
}

/// `GET /api/v1/surge?lat=…&lng=…` — convenience for mobile clients.
pub async fn get_by_location(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Query(params): Query<LocationParams>,
) -> Result<Json<SurgeResponse>, AppError> {
    let cell_id = geo::surge_cell(params.lat, params.lng)
        .map_err(|e| AppError::validation(e.to_string()))?;
    let multiplier = state.surge.get(&tenant_id, &cell_id).await?;
    Ok(Json(SurgeResponse {
        geo_cell: cell_id,
        latitude: Some(params.lat),
        longitude: Some(params.lng),
        surge_multiplier: multiplier,
    }))
}
