use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::collections::HashMap;

use crate::api::{not_found, AppState, ErrorResponse};
use crate::models::{DeviceView, MarkerListResponse, VehicleListResponse, VehicleStatus};

/// Full current view of every tracked vehicle, placed or not.
#[utoipa::path(
    get,
    path = "/api/vehicles",
    responses(
        (status = 200, description = "Fused current state of all tracked vehicles", body = VehicleListResponse)
    ),
    tag = "vehicles"
)]
pub async fn list_vehicles(State(state): State<AppState>) -> Json<VehicleListResponse> {
    let vehicles = state.cache.get_all().await;
    Json(VehicleListResponse {
        vehicles,
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[utoipa::path(
    get,
    path = "/api/vehicles/{imei}",
    params(
        ("imei" = String, Path, description = "Device hardware identifier")
    ),
    responses(
        (status = 200, description = "Current state of one vehicle", body = DeviceView),
        (status = 404, description = "Unknown device", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_vehicle(
    State(state): State<AppState>,
    Path(imei): Path<String>,
) -> Result<Json<DeviceView>, (StatusCode, Json<ErrorResponse>)> {
    state
        .cache
        .get(&imei)
        .await
        .map(Json)
        .ok_or_else(|| not_found("device"))
}

/// Vehicle counts per operational status, for the dashboard header.
#[utoipa::path(
    get,
    path = "/api/vehicles/status_counts",
    responses(
        (status = 200, description = "Vehicle counts keyed by operational status", body = Object)
    ),
    tag = "vehicles"
)]
pub async fn status_counts(State(state): State<AppState>) -> Json<HashMap<VehicleStatus, usize>> {
    Json(state.cache.counts_by_status().await)
}

/// Map-ready projection: only vehicles with resolvable coordinates.
#[utoipa::path(
    get,
    path = "/api/vehicles/markers",
    responses(
        (status = 200, description = "Map markers for all placeable vehicles", body = MarkerListResponse)
    ),
    tag = "vehicles"
)]
pub async fn list_markers(State(state): State<AppState>) -> Json<MarkerListResponse> {
    let markers = state.cache.map_markers().await;
    Json(MarkerListResponse {
        markers,
        timestamp: Utc::now().to_rfc3339(),
    })
}
