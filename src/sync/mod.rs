//! Background ingestion loops.
//!
//! Three independent self-rescheduling loops share the engine state:
//! - the poll loop fetches live vehicle positions, runs visit detection and
//!   persists the cycle, at a day/night-dependent cadence;
//! - the static refresh loop replaces the persisted reference tables and the
//!   in-memory cache wholesale;
//! - the retention sweeper deletes snapshots and visits past the horizon.
//!
//! Each loop runs as a single task, so a loop never has two of its own
//! cycles in flight; a cycle failure is logged and the next cycle is
//! scheduled normally.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::geofence::{self, StopVisit};
use crate::engine::reference::ReferenceCache;
use crate::engine::{Engine, VehicleCycle};
use crate::providers::feed::{FeedClient, FeedVehicle};

/// Uniform RFC 3339 UTC rendering for every persisted timestamp, so string
/// comparison in SQL (range scans, MIN/MAX widening) matches time order.
pub fn rfc3339_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drives the poll, static refresh and retention loops.
pub struct SyncManager {
    pool: SqlitePool,
    client: Arc<FeedClient>,
    config: Config,
    timezone: Tz,
    engine: Arc<Engine>,
}

impl SyncManager {
    pub fn new(pool: SqlitePool, config: Config, client: Arc<FeedClient>) -> Self {
        let timezone = config.parsed_timezone();
        Self {
            pool,
            client,
            config,
            timezone,
            engine: Arc::new(Engine::new()),
        }
    }

    /// Shared engine handle for the API layer.
    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    /// Start the background loops. Runs forever.
    pub async fn start(self: Arc<Self>) {
        info!("Starting sync manager");

        // Initial reference refresh on startup; pollers run against an empty
        // cache (producing no visits) until the first refresh succeeds.
        if let Err(e) = self.refresh_static().await {
            error!(error = %e, "Initial static refresh failed, keeping empty cache");
        }

        // Static refresh loop
        let refresh_self = self.clone();
        let refresh_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                refresh_self.config.refresh_interval_secs,
            ));
            // Skip the first tick which fires immediately (we already refreshed above)
            interval.tick().await;

            loop {
                interval.tick().await;
                if let Err(e) = refresh_self.refresh_static().await {
                    error!(error = %e, "Static refresh failed, keeping previous reference data");
                }
            }
        });

        // Poll loop. The interval depends on the local hour, so this sleeps
        // explicitly after each cycle instead of using a fixed interval;
        // the next cycle is scheduled only once the current one settled.
        let poll_self = self.clone();
        let poll_handle = tokio::spawn(async move {
            loop {
                if let Err(e) = poll_self.poll_cycle().await {
                    error!(error = %e, "Poll cycle failed");
                }
                let local_hour = Utc::now().with_timezone(&poll_self.timezone).hour();
                tokio::time::sleep(poll_self.config.poll.interval_at(local_hour)).await;
            }
        });

        // Retention sweep loop (first tick fires immediately)
        let sweep_self = self.clone();
        let sweep_handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(24 * 60 * 60));

            loop {
                interval.tick().await;
                if let Err(e) = sweep_self.sweep_retention().await {
                    error!(error = %e, "Retention sweep failed");
                }
            }
        });

        // Wait for the loops (they run forever)
        let _ = tokio::join!(refresh_handle, poll_handle, sweep_handle);
    }

    /// One fetch-detect-persist cycle.
    async fn poll_cycle(&self) -> Result<(), SyncError> {
        let vehicles = self
            .client
            .fetch_vehicles()
            .await
            .map_err(|e| SyncError::FeedError(e.to_string()))?;
        let fetched_at = Utc::now();

        let reference = self.engine.reference().await;
        let visits = {
            let mut containment = self.engine.containment().await;
            geofence::detect_visits(
                &reference,
                &mut containment,
                &vehicles,
                fetched_at,
                self.config.poll.entry_radius_m,
                self.config.poll.exit_radius_m,
            )
        };

        self.persist_cycle(&vehicles, &visits, fetched_at).await?;

        info!(
            vehicles = vehicles.len(),
            visits = visits.len(),
            "Completed poll cycle"
        );

        // Only a fully persisted cycle becomes the served snapshot.
        self.engine
            .store_cycle(VehicleCycle {
                fetched_at,
                vehicles,
            })
            .await;

        Ok(())
    }

    /// Persist one cycle's snapshots, visits and per-route daily envelope in
    /// a single transaction.
    async fn persist_cycle(
        &self,
        vehicles: &[FeedVehicle],
        visits: &[StopVisit],
        fetched_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let fetched = rfc3339_utc(fetched_at);
        let day = fetched_at.with_timezone(&self.timezone).date_naive().to_string();

        for vehicle in vehicles {
            sqlx::query(
                r#"
                INSERT INTO vehicle_snapshots
                    (vehicle_id, label, lat, lon, reported_at, speed, route_id, trip_id,
                     wheelchair_accessible, bike_allowed, fetched_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&vehicle.id)
            .bind(&vehicle.label)
            .bind(vehicle.lat)
            .bind(vehicle.lon)
            .bind(&vehicle.reported_at)
            .bind(vehicle.speed)
            .bind(vehicle.route_id)
            .bind(&vehicle.trip_id)
            .bind(vehicle.wheelchair_accessible)
            .bind(vehicle.bike_allowed)
            .bind(&fetched)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        for visit in visits {
            sqlx::query(
                r#"
                INSERT INTO stop_visits
                    (stop_id, route_id, trip_id, vehicle_id, observed_at, fetched_at,
                     lat, lon, exit_distance_m)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(visit.stop_id)
            .bind(visit.route_id)
            .bind(&visit.trip_id)
            .bind(&visit.vehicle_id)
            .bind(rfc3339_utc(visit.observed_at))
            .bind(rfc3339_utc(visit.fetched_at))
            .bind(visit.lat)
            .bind(visit.lon)
            .bind(visit.exit_distance_m)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        // Widen the (day, route) envelope; MIN/MAX on the uniform RFC 3339
        // strings keeps existing extremes.
        let route_ids: BTreeSet<i64> = vehicles.iter().filter_map(|v| v.route_id).collect();
        for route_id in route_ids {
            sqlx::query(
                r#"
                INSERT INTO route_daily_stats (day, route_id, first_seen_at, last_seen_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(day, route_id) DO UPDATE SET
                    first_seen_at = MIN(first_seen_at, excluded.first_seen_at),
                    last_seen_at = MAX(last_seen_at, excluded.last_seen_at)
                "#,
            )
            .bind(&day)
            .bind(route_id)
            .bind(&fetched)
            .bind(&fetched)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))
    }

    /// Fetch the full reference graph and replace the persisted tables and
    /// the in-memory cache. Any failure leaves both untouched.
    async fn refresh_static(&self) -> Result<(), SyncError> {
        info!("Starting static reference refresh");

        let (routes, trips, stops, stop_times, shapes) = futures::try_join!(
            self.client.fetch_routes(),
            self.client.fetch_trips(),
            self.client.fetch_stops(),
            self.client.fetch_stop_times(),
            self.client.fetch_shapes(),
        )
        .map_err(|e| SyncError::FeedError(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM routes")
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        for route in &routes {
            sqlx::query(
                r#"
                INSERT INTO routes (route_id, agency_id, short_name, long_name, color, route_type, description)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(route.id)
            .bind(&route.agency_id)
            .bind(&route.short_name)
            .bind(&route.long_name)
            .bind(&route.color)
            .bind(route.route_type)
            .bind(&route.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        sqlx::query("DELETE FROM trips")
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        for trip in &trips {
            sqlx::query(
                r#"
                INSERT INTO trips (trip_id, route_id, headsign, direction, block_id, shape_id)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&trip.id)
            .bind(trip.route_id)
            .bind(&trip.headsign)
            .bind(trip.direction)
            .bind(&trip.block_id)
            .bind(&trip.shape_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        sqlx::query("DELETE FROM stops")
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        for stop in &stops {
            sqlx::query(
                r#"
                INSERT INTO stops (stop_id, name, lat, lon, location_type, stop_code)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(stop.id)
            .bind(&stop.name)
            .bind(stop.lat)
            .bind(stop.lon)
            .bind(stop.location_type)
            .bind(&stop.code)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        sqlx::query("DELETE FROM stop_times")
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        for st in &stop_times {
            sqlx::query(
                "INSERT INTO stop_times (trip_id, stop_sequence, stop_id) VALUES (?, ?, ?)",
            )
            .bind(&st.trip_id)
            .bind(st.stop_sequence)
            .bind(st.stop_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        sqlx::query("DELETE FROM shape_points")
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        for point in &shapes {
            sqlx::query(
                "INSERT INTO shape_points (shape_id, point_sequence, lat, lon) VALUES (?, ?, ?, ?)",
            )
            .bind(&point.shape_id)
            .bind(point.sequence)
            .bind(point.lat)
            .bind(point.lon)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        // Tables are committed; now swap the cache in one step so concurrent
        // readers move from the old complete graph to the new complete graph.
        let cache = ReferenceCache::build(&routes, &trips, &stops, &stop_times);
        info!(
            routes = cache.routes.len(),
            trips = cache.trips.len(),
            stops = cache.stops.len(),
            shape_points = shapes.len(),
            "Swapped reference cache"
        );
        self.engine.swap_reference(cache).await;

        Ok(())
    }

    /// Delete snapshots and visits older than the retention horizon.
    async fn sweep_retention(&self) -> Result<(), SyncError> {
        let cutoff = rfc3339_utc(Utc::now() - chrono::Duration::days(self.config.retention_days));

        let snapshots = sqlx::query("DELETE FROM vehicle_snapshots WHERE fetched_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?
            .rows_affected();

        let visits = sqlx::query("DELETE FROM stop_visits WHERE observed_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?
            .rows_affected();

        info!(snapshots, visits, cutoff = %cutoff, "Completed retention sweep");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Feed fetch error: {0}")]
    FeedError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_formatting_is_uniform_and_ordered() {
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 30).unwrap();
        let a = rfc3339_utc(early);
        let b = rfc3339_utc(late);
        assert_eq!(a, "2026-03-02T08:00:05.000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
