use std::collections::{HashMap, HashSet};

use crate::providers::feed::{FeedRoute, FeedStop, FeedStopTime, FeedTrip};

#[derive(Debug, Clone)]
pub struct Route {
    pub route_id: i64,
    pub agency_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub color: Option<String>,
    pub route_type: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: i64,
    pub headsign: Option<String>,
    pub direction: Option<i64>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stop {
    pub stop_id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub location_type: Option<i64>,
    pub stop_code: Option<String>,
}

/// The in-memory reference graph built from one static refresh.
///
/// A refresh builds a complete new instance and swaps it in behind an Arc,
/// so readers never observe a half-rebuilt cache.
pub struct ReferenceCache {
    pub routes: HashMap<i64, Route>,
    pub trips: HashMap<String, Trip>,
    pub stops: HashMap<i64, Stop>,
    /// trip_id -> stop ids serviced by that trip (from stop_times)
    pub trip_stop_ids: HashMap<String, HashSet<i64>>,
}

impl ReferenceCache {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            trips: HashMap::new(),
            stops: HashMap::new(),
            trip_stop_ids: HashMap::new(),
        }
    }

    pub fn build(
        routes: &[FeedRoute],
        trips: &[FeedTrip],
        stops: &[FeedStop],
        stop_times: &[FeedStopTime],
    ) -> Self {
        let routes = routes
            .iter()
            .map(|r| {
                (
                    r.id,
                    Route {
                        route_id: r.id,
                        agency_id: r.agency_id.clone(),
                        short_name: r.short_name.clone(),
                        long_name: r.long_name.clone(),
                        color: r.color.clone(),
                        route_type: r.route_type,
                        description: r.description.clone(),
                    },
                )
            })
            .collect();

        let trips: HashMap<String, Trip> = trips
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    Trip {
                        trip_id: t.id.clone(),
                        route_id: t.route_id,
                        headsign: t.headsign.clone(),
                        direction: t.direction,
                        block_id: t.block_id.clone(),
                        shape_id: t.shape_id.clone(),
                    },
                )
            })
            .collect();

        let stops = stops
            .iter()
            .map(|s| {
                (
                    s.id,
                    Stop {
                        stop_id: s.id,
                        name: s.name.clone(),
                        lat: s.lat,
                        lon: s.lon,
                        location_type: s.location_type,
                        stop_code: s.code.clone(),
                    },
                )
            })
            .collect();

        let mut trip_stop_ids: HashMap<String, HashSet<i64>> = HashMap::new();
        for st in stop_times {
            trip_stop_ids
                .entry(st.trip_id.clone())
                .or_default()
                .insert(st.stop_id);
        }

        Self {
            routes,
            trips,
            stops,
            trip_stop_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_trip(id: &str, route_id: i64) -> FeedTrip {
        FeedTrip {
            id: id.to_string(),
            route_id,
            headsign: None,
            direction: Some(0),
            block_id: None,
            shape_id: None,
        }
    }

    fn feed_stop_time(trip_id: &str, stop_id: i64, seq: i64) -> FeedStopTime {
        FeedStopTime {
            trip_id: trip_id.to_string(),
            stop_id,
            stop_sequence: seq,
        }
    }

    #[test]
    fn builds_trip_stop_sets_from_stop_times() {
        let cache = ReferenceCache::build(
            &[],
            &[feed_trip("t-1", 7), feed_trip("t-2", 8)],
            &[],
            &[
                feed_stop_time("t-1", 10, 1),
                feed_stop_time("t-1", 11, 2),
                feed_stop_time("t-1", 10, 3),
                feed_stop_time("t-2", 12, 1),
            ],
        );

        let t1 = cache.trip_stop_ids.get("t-1").unwrap();
        assert_eq!(t1.len(), 2);
        assert!(t1.contains(&10) && t1.contains(&11));
        assert_eq!(cache.trip_stop_ids.get("t-2").unwrap().len(), 1);
        assert!(cache.trip_stop_ids.get("t-3").is_none());
    }

    #[test]
    fn empty_cache_has_no_entries() {
        let cache = ReferenceCache::empty();
        assert!(cache.routes.is_empty());
        assert!(cache.trips.is_empty());
        assert!(cache.stops.is_empty());
        assert!(cache.trip_stop_ids.is_empty());
    }
}
