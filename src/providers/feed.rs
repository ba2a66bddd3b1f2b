//! HTTP client for the transit data provider.
//!
//! The provider exposes five reference endpoints (routes, trips, stops,
//! stop_times, shapes) and one live endpoint (vehicles), all JSON. Every
//! request carries the configured API key and agency id headers; any
//! non-2xx response is a hard failure for that fetch.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::ProviderConfig;

const API_KEY_HEADER: &str = "X-Api-Key";
const AGENCY_ID_HEADER: &str = "X-Agency-Id";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Feed returned HTTP {status} for {endpoint}")]
    Status { endpoint: &'static str, status: u16 },
}

/// A feed resource addressable through the proxy surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResource {
    Vehicles,
    Routes,
    Trips,
    Stops,
    StopTimes,
    Shapes,
}

impl FeedResource {
    pub fn from_path(name: &str) -> Option<Self> {
        match name {
            "vehicles" => Some(Self::Vehicles),
            "routes" => Some(Self::Routes),
            "trips" => Some(Self::Trips),
            "stops" => Some(Self::Stops),
            "stop_times" => Some(Self::StopTimes),
            "shapes" => Some(Self::Shapes),
            _ => None,
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::Routes => "routes",
            Self::Trips => "trips",
            Self::Stops => "stops",
            Self::StopTimes => "stop_times",
            Self::Shapes => "shapes",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRoute {
    pub id: i64,
    pub agency_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub color: Option<String>,
    pub route_type: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTrip {
    pub id: String,
    pub route_id: i64,
    pub headsign: Option<String>,
    /// Binary direction flag from the provider (0/1, domain-specific).
    pub direction: Option<i64>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStop {
    pub id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub location_type: Option<i64>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStopTime {
    pub trip_id: String,
    pub stop_id: i64,
    pub stop_sequence: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedShapePoint {
    pub shape_id: String,
    pub sequence: i64,
    pub lat: f64,
    pub lon: f64,
}

/// One live vehicle position as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedVehicle {
    pub id: String,
    pub label: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// RFC 3339 report time from the vehicle itself, when it sends one.
    pub reported_at: Option<String>,
    pub speed: Option<f64>,
    pub route_id: Option<i64>,
    pub trip_id: Option<String>,
    pub wheelchair_accessible: Option<bool>,
    pub bike_allowed: Option<bool>,
}

pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    agency_id: String,
}

impl FeedClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            agency_id: config.agency_id.clone(),
        })
    }

    async fn get(&self, endpoint: &'static str) -> Result<reqwest::Response, FeedError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(AGENCY_ID_HEADER, &self.agency_id)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    pub async fn fetch_routes(&self) -> Result<Vec<FeedRoute>, FeedError> {
        Ok(self.get("routes").await?.json().await?)
    }

    pub async fn fetch_trips(&self) -> Result<Vec<FeedTrip>, FeedError> {
        Ok(self.get("trips").await?.json().await?)
    }

    pub async fn fetch_stops(&self) -> Result<Vec<FeedStop>, FeedError> {
        Ok(self.get("stops").await?.json().await?)
    }

    pub async fn fetch_stop_times(&self) -> Result<Vec<FeedStopTime>, FeedError> {
        Ok(self.get("stop_times").await?.json().await?)
    }

    pub async fn fetch_shapes(&self) -> Result<Vec<FeedShapePoint>, FeedError> {
        Ok(self.get("shapes").await?.json().await?)
    }

    pub async fn fetch_vehicles(&self) -> Result<Vec<FeedVehicle>, FeedError> {
        Ok(self.get("vehicles").await?.json().await?)
    }

    /// Fetch a resource without interpreting the payload, for the proxy surface.
    pub async fn fetch_raw(&self, resource: FeedResource) -> Result<serde_json::Value, FeedError> {
        Ok(self.get(resource.endpoint()).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_round_trip() {
        for name in ["vehicles", "routes", "trips", "stops", "stop_times", "shapes"] {
            let resource = FeedResource::from_path(name).expect("known resource");
            assert_eq!(resource.endpoint(), name);
        }
        assert!(FeedResource::from_path("agencies").is_none());
        assert!(FeedResource::from_path("").is_none());
    }

    #[test]
    fn vehicle_deserializes_with_missing_optionals() {
        let json = r#"{"id": "bus-17", "lat": 48.37, "lon": 10.89, "routeId": 7}"#;
        let vehicle: FeedVehicle = serde_json::from_str(json).unwrap();
        assert_eq!(vehicle.id, "bus-17");
        assert_eq!(vehicle.route_id, Some(7));
        assert!(vehicle.trip_id.is_none());
        assert!(vehicle.reported_at.is_none());
        assert!(vehicle.wheelchair_accessible.is_none());
    }

    #[test]
    fn route_and_stop_deserialize() {
        let route: FeedRoute = serde_json::from_str(
            r#"{"id": 7, "agencyId": "1", "shortName": "7", "longName": "Main Line", "color": "CC0000", "routeType": 3, "description": null}"#,
        )
        .unwrap();
        assert_eq!(route.id, 7);
        assert_eq!(route.short_name.as_deref(), Some("7"));

        let stop: FeedStop = serde_json::from_str(
            r#"{"id": 42, "name": "Center", "lat": 48.366, "lon": 10.898, "locationType": 0, "code": "C42"}"#,
        )
        .unwrap();
        assert_eq!(stop.id, 42);
        assert_eq!(stop.code.as_deref(), Some("C42"));
    }

    #[test]
    fn stop_time_deserializes() {
        let st: FeedStopTime =
            serde_json::from_str(r#"{"tripId": "t-1", "stopId": 42, "stopSequence": 3}"#).unwrap();
        assert_eq!(st.trip_id, "t-1");
        assert_eq!(st.stop_sequence, 3);
    }
}
