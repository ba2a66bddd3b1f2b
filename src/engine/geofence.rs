//! Geofence-based stop-visit detection.
//!
//! Containment per (vehicle, stop) is binary and only ever transitions
//! Outside -> Inside -> Outside. Entry uses a smaller radius than exit, so
//! a vehicle hovering between the two radii never flaps. A visit is emitted
//! once per containment episode, at the moment the vehicle leaves.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::reference::ReferenceCache;
use crate::providers::feed::FeedVehicle;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A vehicle leaving a stop's geofence. One per containment episode;
/// position and distance are taken at the moment of exit.
#[derive(Debug, Clone)]
pub struct StopVisit {
    pub stop_id: i64,
    pub route_id: Option<i64>,
    pub trip_id: Option<String>,
    pub vehicle_id: String,
    pub observed_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub exit_distance_m: f64,
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Run one polling cycle's positions through the containment state machine.
///
/// Vehicles without coordinates, without a route, without a known trip, or
/// whose trip belongs to a different route than reported contribute nothing;
/// these are expected feed conditions, not errors.
pub fn detect_visits(
    reference: &ReferenceCache,
    containment: &mut HashSet<(String, i64)>,
    vehicles: &[FeedVehicle],
    fetched_at: DateTime<Utc>,
    entry_radius_m: f64,
    exit_radius_m: f64,
) -> Vec<StopVisit> {
    let mut visits = Vec::new();

    for vehicle in vehicles {
        let (Some(lat), Some(lon)) = (vehicle.lat, vehicle.lon) else {
            continue;
        };
        if !lat.is_finite() || !lon.is_finite() {
            continue;
        }
        let Some(route_id) = vehicle.route_id else {
            continue;
        };
        let Some(trip_id) = vehicle.trip_id.as_deref() else {
            continue;
        };
        let Some(trip) = reference.trips.get(trip_id) else {
            continue;
        };
        if trip.route_id != route_id {
            continue;
        }
        let Some(stop_ids) = reference.trip_stop_ids.get(trip_id) else {
            continue;
        };

        let observed_at = vehicle
            .reported_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(fetched_at);

        for &stop_id in stop_ids {
            let Some(stop) = reference.stops.get(&stop_id) else {
                continue;
            };

            let distance = haversine_distance(lat, lon, stop.lat, stop.lon);
            let key = (vehicle.id.clone(), stop_id);

            if containment.contains(&key) {
                if distance > exit_radius_m {
                    containment.remove(&key);
                    visits.push(StopVisit {
                        stop_id,
                        route_id: Some(route_id),
                        trip_id: Some(trip_id.to_string()),
                        vehicle_id: vehicle.id.clone(),
                        observed_at,
                        fetched_at,
                        lat,
                        lon,
                        exit_distance_m: distance,
                    });
                }
            } else if distance <= entry_radius_m {
                containment.insert(key);
            }
        }
    }

    visits
}
