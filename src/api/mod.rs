pub mod analytics;
pub mod error;
pub mod health;
pub mod proxy;

pub use error::ErrorResponse;

use std::sync::Arc;

use axum::{routing::get, Router};
use chrono_tz::Tz;
use sqlx::SqlitePool;

use crate::engine::Engine;
use crate::providers::feed::FeedClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub engine: Arc<Engine>,
    pub client: Arc<FeedClient>,
    pub timezone: Tz,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/proxy/{resource}", get(proxy::proxy_resource))
        .route("/analytics/stop/{stop_id}", get(analytics::stop_analytics))
        .route(
            "/analytics/route/{route_id}",
            get(analytics::route_analytics),
        )
        .with_state(state)
}
