use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::sync::rfc3339_utc;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Whether the service is running
    pub ok: bool,
    /// Number of routes in the reference cache
    pub route_count: usize,
    /// Number of trips in the reference cache
    pub trip_count: usize,
    /// Number of stops in the reference cache
    pub stop_count: usize,
    /// Fetch time of the last successfully polled vehicle cycle
    pub last_cycle_at: Option<String>,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health and cache status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let reference = state.engine.reference().await;
    let last_cycle_at = state
        .engine
        .latest_cycle()
        .await
        .map(|cycle| rfc3339_utc(cycle.fetched_at));

    Json(HealthResponse {
        ok: true,
        route_count: reference.routes.len(),
        trip_count: reference.trips.len(),
        stop_count: reference.stops.len(),
        last_cycle_at,
    })
}
