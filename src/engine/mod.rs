//! Shared in-process state for the detection pipeline.
//!
//! The engine owns the three pieces of mutable state the loops and the API
//! share: the static reference cache, the geofence containment set, and the
//! most recent successfully polled vehicle cycle. The caches are replaced
//! wholesale (new instance swapped behind an Arc), never mutated in place,
//! so a reader that grabbed an Arc across an await point keeps a consistent
//! view. Containment state is transient and starts empty on restart.

pub mod geofence;
pub mod reference;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::providers::feed::FeedVehicle;
use reference::ReferenceCache;

/// One successfully polled cycle of live vehicle positions.
#[derive(Debug, Clone)]
pub struct VehicleCycle {
    pub fetched_at: DateTime<Utc>,
    pub vehicles: Vec<FeedVehicle>,
}

pub struct Engine {
    reference: RwLock<Arc<ReferenceCache>>,
    containment: Mutex<HashSet<(String, i64)>>,
    latest: RwLock<Option<Arc<VehicleCycle>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            reference: RwLock::new(Arc::new(ReferenceCache::empty())),
            containment: Mutex::new(HashSet::new()),
            latest: RwLock::new(None),
        }
    }

    /// Current reference cache. The returned Arc stays consistent even if a
    /// refresh swaps in a new cache while the caller holds it.
    pub async fn reference(&self) -> Arc<ReferenceCache> {
        self.reference.read().await.clone()
    }

    pub async fn swap_reference(&self, cache: ReferenceCache) {
        let mut guard = self.reference.write().await;
        *guard = Arc::new(cache);
    }

    /// Exclusive access to the containment set for one detection pass.
    pub async fn containment(&self) -> MutexGuard<'_, HashSet<(String, i64)>> {
        self.containment.lock().await
    }

    pub async fn latest_cycle(&self) -> Option<Arc<VehicleCycle>> {
        self.latest.read().await.clone()
    }

    pub async fn store_cycle(&self, cycle: VehicleCycle) {
        let mut guard = self.latest.write().await;
        *guard = Some(Arc::new(cycle));
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::feed::{FeedRoute, FeedStop, FeedStopTime, FeedTrip};
    use chrono::TimeZone;

    #[tokio::test]
    async fn reference_swap_is_visible_to_new_readers() {
        let engine = Engine::new();
        assert!(engine.reference().await.routes.is_empty());

        let before = engine.reference().await;

        let cache = ReferenceCache::build(
            &[FeedRoute {
                id: 7,
                agency_id: None,
                short_name: Some("7".into()),
                long_name: None,
                color: None,
                route_type: Some(3),
                description: None,
            }],
            &[] as &[FeedTrip],
            &[] as &[FeedStop],
            &[] as &[FeedStopTime],
        );
        engine.swap_reference(cache).await;

        // The old handle still sees the old cache; fresh reads see the new one.
        assert!(before.routes.is_empty());
        assert!(engine.reference().await.routes.contains_key(&7));
    }

    #[tokio::test]
    async fn latest_cycle_replaced_wholesale() {
        let engine = Engine::new();
        assert!(engine.latest_cycle().await.is_none());

        let fetched_at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        engine
            .store_cycle(VehicleCycle {
                fetched_at,
                vehicles: Vec::new(),
            })
            .await;

        let cycle = engine.latest_cycle().await.unwrap();
        assert_eq!(cycle.fetched_at, fetched_at);
    }
}
