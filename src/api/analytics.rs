use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use super::error::{bad_request, internal_error, not_found};
use super::AppState;
use crate::analytics::{self, DayBucket, RouteMeta, RouteStats, VisitRow};
use crate::sync::rfc3339_utc;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopInfo {
    pub stop_id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub stop_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopAnalyticsResponse {
    pub stop: StopInfo,
    pub routes: Vec<RouteMeta>,
    pub days: Vec<DayBucket>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteAnalyticsResponse {
    pub route_id: i64,
    pub stats: Option<RouteStats>,
}

/// Observed and predicted arrivals for a stop over the rolling 7-day window
#[utoipa::path(
    get,
    path = "/analytics/stop/{stop_id}",
    params(
        ("stop_id" = String, Path, description = "Numeric stop id")
    ),
    responses(
        (status = 200, description = "Per-day, per-route arrival view", body = StopAnalyticsResponse),
        (status = 400, description = "Non-numeric stop id", body = super::ErrorResponse),
        (status = 404, description = "Unknown stop", body = super::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn stop_analytics(
    State(state): State<AppState>,
    Path(stop_id): Path<String>,
) -> Response {
    let Ok(stop_id) = stop_id.parse::<i64>() else {
        return bad_request(format!("Stop id must be numeric: {stop_id}"));
    };

    let reference = state.engine.reference().await;
    let Some(stop) = reference.stops.get(&stop_id) else {
        return not_found(format!("Unknown stop: {stop_id}"));
    };
    let stop = StopInfo {
        stop_id: stop.stop_id,
        name: stop.name.clone(),
        lat: stop.lat,
        lon: stop.lon,
        stop_code: stop.stop_code.clone(),
    };

    // Window starts at local midnight six days ago, so buckets are whole
    // local days.
    let now = Utc::now();
    let window_start =
        now.with_timezone(&state.timezone).date_naive() - chrono::Duration::days(6);
    let cutoff = state
        .timezone
        .from_local_datetime(&window_start.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&window_start.and_time(NaiveTime::MIN)));

    let rows: Vec<(Option<i64>, String)> = match sqlx::query_as(
        "SELECT route_id, observed_at FROM stop_visits \
         WHERE stop_id = ? AND observed_at >= ? ORDER BY observed_at",
    )
    .bind(stop_id)
    .bind(rfc3339_utc(cutoff))
    .fetch_all(&state.pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => return internal_error(e),
    };

    let visits: Vec<VisitRow> = rows
        .into_iter()
        .filter_map(
            |(route_id, observed_at)| match DateTime::parse_from_rfc3339(&observed_at) {
                Ok(dt) => Some(VisitRow {
                    route_id,
                    observed_at: dt.with_timezone(&Utc),
                }),
                Err(e) => {
                    warn!(error = %e, observed_at, "Skipping stop visit with unparseable timestamp");
                    None
                }
            },
        )
        .collect();

    let view = analytics::build_stop_view(&visits, &reference, now, state.timezone);
    Json(StopAnalyticsResponse {
        stop,
        routes: view.routes,
        days: view.days,
    })
    .into_response()
}

/// First-seen time-of-day percentiles for a route
#[utoipa::path(
    get,
    path = "/analytics/route/{route_id}",
    params(
        ("route_id" = String, Path, description = "Numeric route id")
    ),
    responses(
        (status = 200, description = "Route daily statistics, stats null without samples", body = RouteAnalyticsResponse),
        (status = 400, description = "Non-numeric route id", body = super::ErrorResponse)
    ),
    tag = "analytics"
)]
pub async fn route_analytics(
    State(state): State<AppState>,
    Path(route_id): Path<String>,
) -> Response {
    let Ok(route_id) = route_id.parse::<i64>() else {
        return bad_request(format!("Route id must be numeric: {route_id}"));
    };

    let rows: Vec<(String,)> =
        match sqlx::query_as("SELECT first_seen_at FROM route_daily_stats WHERE route_id = ?")
            .bind(route_id)
            .fetch_all(&state.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => return internal_error(e),
        };

    let first_seen: Vec<DateTime<Utc>> = rows
        .iter()
        .filter_map(|(first_seen_at,)| {
            DateTime::parse_from_rfc3339(first_seen_at)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .collect();

    let stats = analytics::first_seen_stats(&first_seen, state.timezone);
    Json(RouteAnalyticsResponse { route_id, stats }).into_response()
}
