//! Empirical arrival analytics over recorded stop visits.
//!
//! Everything here is pure over already-loaded rows: the API layer queries
//! SQLite and hands the rows in together with the reference cache and the
//! caller's notion of "now". Visits are bucketed per local calendar day and
//! route; the sorted times within one bucket form that day's run sequence,
//! and run index is the join key across days for prediction.

pub mod percentile;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use utoipa::ToSchema;

use crate::engine::reference::ReferenceCache;

/// One stop-visit row as loaded from the event store.
#[derive(Debug, Clone)]
pub struct VisitRow {
    pub route_id: Option<i64>,
    pub observed_at: DateTime<Utc>,
}

/// A single arrival in a day's run sequence.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ArrivalPoint {
    /// Minutes after local midnight, fractional seconds included.
    pub minutes: f64,
    pub predicted: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteDay {
    pub route_id: i64,
    pub times: Vec<ArrivalPoint>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    /// Local calendar day (YYYY-MM-DD).
    pub date: String,
    pub routes: Vec<RouteDay>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    pub route_id: i64,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub color: Option<String>,
}

/// First-seen time-of-day percentiles for a route, across its recorded days.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteStats {
    pub samples: usize,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

pub struct StopView {
    pub routes: Vec<RouteMeta>,
    pub days: Vec<DayBucket>,
}

/// Minutes after local midnight, carrying fractional seconds.
fn minutes_of_day<T: TimeZone>(dt: &DateTime<T>) -> f64 {
    dt.num_seconds_from_midnight() as f64 / 60.0 + dt.nanosecond() as f64 / 60e9
}

/// Positional merge of historical run sequences into one predicted sequence:
/// the prediction for run index i is the median of the i-th time across all
/// days that reached at least i + 1 runs.
pub fn merge_run_predictions(sequences: &[Vec<f64>]) -> Vec<f64> {
    let max_runs = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut predicted = Vec::with_capacity(max_runs);

    for run in 0..max_runs {
        let mut samples: Vec<f64> = sequences
            .iter()
            .filter_map(|seq| seq.get(run).copied())
            .collect();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(p) = percentile::median(&samples) {
            predicted.push(p);
        }
    }

    predicted
}

/// Build the 7-day observed/predicted view for one stop.
///
/// `visits` is expected to already be restricted to the stop and the rolling
/// window; rows whose route is missing from the reference cache are dropped
/// here so a stale event store cannot resurrect removed routes.
pub fn build_stop_view(
    visits: &[VisitRow],
    reference: &ReferenceCache,
    now: DateTime<Utc>,
    tz: Tz,
) -> StopView {
    let today = now.with_timezone(&tz).date_naive();
    let now_minutes = minutes_of_day(&now.with_timezone(&tz));

    // (local day -> route -> ascending times-of-day)
    let mut buckets: BTreeMap<NaiveDate, BTreeMap<i64, Vec<f64>>> = BTreeMap::new();
    for visit in visits {
        let Some(route_id) = visit.route_id else {
            continue;
        };
        if !reference.routes.contains_key(&route_id) {
            continue;
        }
        let local = visit.observed_at.with_timezone(&tz);
        buckets
            .entry(local.date_naive())
            .or_default()
            .entry(route_id)
            .or_default()
            .push(minutes_of_day(&local));
    }
    for by_route in buckets.values_mut() {
        for times in by_route.values_mut() {
            times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        }
    }

    // Historical sample sequences per route (every bucketed day except today).
    let mut history: BTreeMap<i64, Vec<Vec<f64>>> = BTreeMap::new();
    for (date, by_route) in &buckets {
        if *date == today {
            continue;
        }
        for (route_id, times) in by_route {
            history.entry(*route_id).or_default().push(times.clone());
        }
    }

    let mut predicted: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for (route_id, sequences) in &history {
        predicted.insert(*route_id, merge_run_predictions(sequences));
    }

    let mut days = Vec::new();
    for (date, by_route) in &buckets {
        if *date == today {
            continue;
        }
        let routes = by_route
            .iter()
            .map(|(route_id, times)| RouteDay {
                route_id: *route_id,
                times: times
                    .iter()
                    .map(|&minutes| ArrivalPoint {
                        minutes,
                        predicted: false,
                    })
                    .collect(),
            })
            .collect();
        days.push(DayBucket {
            date: date.to_string(),
            routes,
        });
    }

    // Today: everything observed so far, plus predicted runs still ahead of
    // now. Predicted runs already in the past are dropped without a marker.
    let mut today_routes: BTreeMap<i64, Vec<ArrivalPoint>> = BTreeMap::new();
    if let Some(by_route) = buckets.get(&today) {
        for (route_id, times) in by_route {
            today_routes.entry(*route_id).or_default().extend(
                times.iter().map(|&minutes| ArrivalPoint {
                    minutes,
                    predicted: false,
                }),
            );
        }
    }
    for (route_id, runs) in &predicted {
        for &minutes in runs {
            if minutes > now_minutes {
                today_routes
                    .entry(*route_id)
                    .or_default()
                    .push(ArrivalPoint {
                        minutes,
                        predicted: true,
                    });
            }
        }
    }
    for points in today_routes.values_mut() {
        points.sort_by(|a, b| {
            a.minutes
                .partial_cmp(&b.minutes)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    if !today_routes.is_empty() {
        days.push(DayBucket {
            date: today.to_string(),
            routes: today_routes
                .into_iter()
                .map(|(route_id, times)| RouteDay { route_id, times })
                .collect(),
        });
    }

    // Metadata for every route appearing anywhere in the window, sorted by
    // short name with the numeric id as fallback for display stability.
    let mut route_ids: HashSet<i64> = HashSet::new();
    for day in &days {
        route_ids.extend(day.routes.iter().map(|r| r.route_id));
    }
    let mut routes: Vec<RouteMeta> = route_ids
        .into_iter()
        .filter_map(|route_id| {
            reference.routes.get(&route_id).map(|route| RouteMeta {
                route_id,
                short_name: route.short_name.clone(),
                long_name: route.long_name.clone(),
                color: route.color.clone(),
            })
        })
        .collect();
    routes.sort_by_key(|meta| {
        (
            meta.short_name
                .clone()
                .unwrap_or_else(|| meta.route_id.to_string()),
            meta.route_id,
        )
    });

    StopView { routes, days }
}

/// Percentiles of first-seen time-of-day across a route's recorded days.
pub fn first_seen_stats(first_seen: &[DateTime<Utc>], tz: Tz) -> Option<RouteStats> {
    if first_seen.is_empty() {
        return None;
    }

    let mut minutes: Vec<f64> = first_seen
        .iter()
        .map(|dt| minutes_of_day(&dt.with_timezone(&tz)))
        .collect();
    minutes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let at = |p: f64| percentile::percentile(&minutes, p).unwrap_or(minutes[0]);
    Some(RouteStats {
        samples: minutes.len(),
        p50: at(50.0),
        p90: at(90.0),
        p99: at(99.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::feed::{FeedRoute, FeedStop, FeedStopTime, FeedTrip};
    use chrono_tz::UTC;

    fn reference_with_routes(ids: &[i64]) -> ReferenceCache {
        let routes: Vec<FeedRoute> = ids
            .iter()
            .map(|&id| FeedRoute {
                id,
                agency_id: None,
                short_name: Some(id.to_string()),
                long_name: None,
                color: Some("CC0000".into()),
                route_type: Some(3),
                description: None,
            })
            .collect();
        ReferenceCache::build(&routes, &[] as &[FeedTrip], &[] as &[FeedStop], &[] as &[FeedStopTime])
    }

    fn visit(route_id: i64, y: i32, m: u32, d: u32, hh: u32, mm: u32) -> VisitRow {
        VisitRow {
            route_id: Some(route_id),
            observed_at: Utc.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap(),
        }
    }

    #[test]
    fn positional_merge_is_order_preserving() {
        let sequences = vec![vec![5.0, 20.0], vec![7.0, 18.0], vec![6.0, 22.0]];
        assert_eq!(merge_run_predictions(&sequences), vec![6.0, 20.0]);
    }

    #[test]
    fn merge_handles_uneven_run_depths() {
        // Only one day reached a second run, so its value carries through.
        let sequences = vec![vec![5.0], vec![7.0, 18.0], vec![6.0]];
        assert_eq!(merge_run_predictions(&sequences), vec![6.0, 18.0]);
        assert!(merge_run_predictions(&[]).is_empty());
    }

    #[test]
    fn empty_window_yields_empty_days() {
        let reference = reference_with_routes(&[7]);
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 10, 0).unwrap();
        let view = build_stop_view(&[], &reference, now, UTC);
        assert!(view.days.is_empty());
        assert!(view.routes.is_empty());
    }

    #[test]
    fn today_mixes_observed_and_future_predictions() {
        // Yesterday: 08:01 and 08:16. Today: 08:03 observed, now 08:10.
        let reference = reference_with_routes(&[7]);
        let visits = vec![
            visit(7, 2026, 3, 1, 8, 1),
            visit(7, 2026, 3, 1, 8, 16),
            visit(7, 2026, 3, 2, 8, 3),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 10, 0).unwrap();
        let view = build_stop_view(&visits, &reference, now, UTC);

        assert_eq!(view.days.len(), 2);
        assert_eq!(view.days[0].date, "2026-03-01");
        assert_eq!(view.days[1].date, "2026-03-02");

        let today = &view.days[1].routes[0];
        assert_eq!(today.route_id, 7);
        // Observed 08:03 plus predicted 08:16; the 08:01 prediction is
        // already past and silently omitted.
        assert_eq!(today.times.len(), 2);
        assert_eq!(today.times[0].minutes, 483.0);
        assert!(!today.times[0].predicted);
        assert_eq!(today.times[1].minutes, 496.0);
        assert!(today.times[1].predicted);
    }

    #[test]
    fn predictions_use_median_across_days() {
        let reference = reference_with_routes(&[7]);
        // Three prior days with run sequences [5,20], [7,18], [6,22] (minutes
        // past midnight), nothing observed today.
        let visits = vec![
            visit(7, 2026, 2, 27, 0, 5),
            visit(7, 2026, 2, 27, 0, 20),
            visit(7, 2026, 2, 28, 0, 7),
            visit(7, 2026, 2, 28, 0, 18),
            visit(7, 2026, 3, 1, 0, 6),
            visit(7, 2026, 3, 1, 0, 22),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let view = build_stop_view(&visits, &reference, now, UTC);

        let today = view.days.last().unwrap();
        assert_eq!(today.date, "2026-03-02");
        let times: Vec<f64> = today.routes[0].times.iter().map(|p| p.minutes).collect();
        assert_eq!(times, vec![6.0, 20.0]);
        assert!(today.routes[0].times.iter().all(|p| p.predicted));
    }

    #[test]
    fn removed_route_is_excluded() {
        // Route 9 visits exist but the reference cache no longer knows it.
        let reference = reference_with_routes(&[7]);
        let visits = vec![
            visit(7, 2026, 3, 1, 8, 1),
            visit(9, 2026, 3, 1, 8, 5),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let view = build_stop_view(&visits, &reference, now, UTC);

        assert_eq!(view.routes.len(), 1);
        assert_eq!(view.routes[0].route_id, 7);
        for day in &view.days {
            assert!(day.routes.iter().all(|r| r.route_id == 7));
        }
    }

    #[test]
    fn today_only_route_gets_no_predictions() {
        let reference = reference_with_routes(&[7]);
        let visits = vec![visit(7, 2026, 3, 2, 8, 3)];
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 10, 0).unwrap();
        let view = build_stop_view(&visits, &reference, now, UTC);

        assert_eq!(view.days.len(), 1);
        let today = &view.days[0].routes[0];
        assert_eq!(today.times.len(), 1);
        assert!(!today.times[0].predicted);
    }

    #[test]
    fn route_metadata_sorted_by_short_name() {
        let reference = reference_with_routes(&[12, 3]);
        let visits = vec![
            visit(12, 2026, 3, 1, 8, 0),
            visit(3, 2026, 3, 1, 9, 0),
        ];
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let view = build_stop_view(&visits, &reference, now, UTC);

        // Lexicographic by short name: "12" before "3".
        let ids: Vec<i64> = view.routes.iter().map(|r| r.route_id).collect();
        assert_eq!(ids, vec![12, 3]);
    }

    #[test]
    fn first_seen_stats_percentiles() {
        let samples: Vec<DateTime<Utc>> = (0..5)
            .map(|d| Utc.with_ymd_and_hms(2026, 3, 1 + d, 5, 30 + d, 0).unwrap())
            .collect();
        let stats = first_seen_stats(&samples, UTC).unwrap();
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.p50, 332.0); // 05:32
        assert!(stats.p90 > stats.p50);
        assert!(stats.p99 >= stats.p90);

        assert!(first_seen_stats(&[], UTC).is_none());
    }
}
