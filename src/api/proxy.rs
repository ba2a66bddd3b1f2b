use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use super::error::{bad_gateway, not_found};
use super::AppState;
use crate::providers::feed::{FeedResource, FeedVehicle};
use crate::sync::rfc3339_utc;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCycleResponse {
    pub fetched_at: String,
    pub vehicles: Vec<FeedVehicle>,
}

/// Pass a provider feed resource through to the caller.
///
/// `vehicles` is served from the last successfully polled cycle when one
/// exists; every other resource (and vehicles before the first cycle) is
/// fetched from the provider on demand.
#[utoipa::path(
    get,
    path = "/proxy/{resource}",
    params(
        ("resource" = String, Path, description = "One of: vehicles, routes, trips, stops, stop_times, shapes")
    ),
    responses(
        (status = 200, description = "Feed payload for the resource"),
        (status = 404, description = "Unknown feed resource", body = super::ErrorResponse),
        (status = 502, description = "Provider fetch failed", body = super::ErrorResponse)
    ),
    tag = "proxy"
)]
pub async fn proxy_resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> Response {
    let Some(resource) = FeedResource::from_path(&resource) else {
        return not_found(format!("Unknown feed resource: {resource}"));
    };

    if resource == FeedResource::Vehicles {
        if let Some(cycle) = state.engine.latest_cycle().await {
            return Json(VehicleCycleResponse {
                fetched_at: rfc3339_utc(cycle.fetched_at),
                vehicles: cycle.vehicles.clone(),
            })
            .into_response();
        }
        // No cycle yet (fresh start); proxy the provider directly without
        // feeding the detector.
        return match state.client.fetch_vehicles().await {
            Ok(vehicles) => Json(VehicleCycleResponse {
                fetched_at: rfc3339_utc(Utc::now()),
                vehicles,
            })
            .into_response(),
            Err(e) => bad_gateway(e),
        };
    }

    match state.client.fetch_raw(resource).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => bad_gateway(e),
    }
}
