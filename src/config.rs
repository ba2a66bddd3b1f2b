use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upstream transit-data provider.
    pub provider: ProviderConfig,
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// IANA timezone used for local-day bucketing and the polling day window.
    #[serde(default = "Config::default_timezone")]
    pub timezone: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Live vehicle polling configuration
    #[serde(default)]
    pub poll: PollConfig,
    /// Interval in seconds between static reference refreshes (default: 6h)
    #[serde(default = "Config::default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Days of vehicle snapshots and stop visits to retain (default: 30)
    #[serde(default = "Config::default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API, without trailing slash.
    pub base_url: String,
    /// Value of the X-Api-Key header sent on every request.
    pub api_key: String,
    /// Value of the X-Agency-Id header sent on every request.
    pub agency_id: String,
}

/// Configuration for the live vehicle poll loop and the visit geofence.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Interval in seconds between poll cycles during the day window (default: 15)
    #[serde(default = "PollConfig::default_day_interval_secs")]
    pub day_interval_secs: u64,
    /// Interval in seconds between poll cycles outside the day window (default: 60)
    #[serde(default = "PollConfig::default_night_interval_secs")]
    pub night_interval_secs: u64,
    /// First local hour (inclusive) of the day window (default: 6)
    #[serde(default = "PollConfig::default_day_start_hour")]
    pub day_start_hour: u32,
    /// Last local hour (exclusive) of the day window (default: 24)
    #[serde(default = "PollConfig::default_day_end_hour")]
    pub day_end_hour: u32,
    /// A vehicle within this distance of a stop is considered inside (default: 50 m)
    #[serde(default = "PollConfig::default_entry_radius_m")]
    pub entry_radius_m: f64,
    /// A contained vehicle beyond this distance has left the stop (default: 60 m).
    /// Must be greater than entry_radius_m so GPS jitter at the boundary
    /// cannot flap the containment state.
    #[serde(default = "PollConfig::default_exit_radius_m")]
    pub exit_radius_m: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            day_interval_secs: Self::default_day_interval_secs(),
            night_interval_secs: Self::default_night_interval_secs(),
            day_start_hour: Self::default_day_start_hour(),
            day_end_hour: Self::default_day_end_hour(),
            entry_radius_m: Self::default_entry_radius_m(),
            exit_radius_m: Self::default_exit_radius_m(),
        }
    }
}

impl PollConfig {
    fn default_day_interval_secs() -> u64 {
        15
    }
    fn default_night_interval_secs() -> u64 {
        60
    }
    fn default_day_start_hour() -> u32 {
        6
    }
    fn default_day_end_hour() -> u32 {
        24
    }
    fn default_entry_radius_m() -> f64 {
        50.0
    }
    fn default_exit_radius_m() -> f64 {
        60.0
    }

    /// Poll interval for a cycle completing at the given local hour.
    pub fn interval_at(&self, local_hour: u32) -> Duration {
        if local_hour >= self.day_start_hour && local_hour < self.day_end_hour {
            Duration::from_secs(self.day_interval_secs)
        } else {
            Duration::from_secs(self.night_interval_secs)
        }
    }
}

impl Config {
    fn default_bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }
    fn default_timezone() -> String {
        "Europe/Berlin".to_string()
    }
    fn default_refresh_interval_secs() -> u64 {
        6 * 60 * 60
    }
    fn default_retention_days() -> i64 {
        30
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Panics on configuration values the service cannot run with.
    pub fn validate(&self) {
        if self.poll.entry_radius_m >= self.poll.exit_radius_m {
            panic!(
                "Geofence configuration error: entry_radius_m ({}) must be smaller than exit_radius_m ({})",
                self.poll.entry_radius_m, self.poll.exit_radius_m
            );
        }
        if self.poll.day_start_hour >= self.poll.day_end_hour || self.poll.day_end_hour > 24 {
            panic!(
                "Poll window configuration error: need day_start_hour < day_end_hour <= 24, got {}..{}",
                self.poll.day_start_hour, self.poll.day_end_hour
            );
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            panic!("Unknown timezone: {}", self.timezone);
        }
    }

    pub fn parsed_timezone(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or_else(|_| panic!("Unknown timezone: {}", self.timezone))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> Config {
        let yaml = format!(
            "provider:\n  base_url: https://feed.test/v1\n  api_key: k\n  agency_id: \"1\"\n{}",
            extra
        );
        serde_yaml::from_str(&yaml).expect("config should parse")
    }

    #[test]
    fn defaults_when_fields_omitted() {
        let config = minimal_config("");
        assert_eq!(config.poll.day_interval_secs, 15);
        assert_eq!(config.poll.night_interval_secs, 60);
        assert_eq!(config.poll.day_start_hour, 6);
        assert_eq!(config.poll.day_end_hour, 24);
        assert_eq!(config.poll.entry_radius_m, 50.0);
        assert_eq!(config.poll.exit_radius_m, 60.0);
        assert_eq!(config.refresh_interval_secs, 6 * 60 * 60);
        assert_eq!(config.retention_days, 30);
        config.validate();
    }

    #[test]
    fn interval_selection_by_local_hour() {
        let poll = PollConfig::default();
        assert_eq!(poll.interval_at(7), Duration::from_secs(15));
        assert_eq!(poll.interval_at(2), Duration::from_secs(60));
        assert_eq!(poll.interval_at(6), Duration::from_secs(15));
        assert_eq!(poll.interval_at(23), Duration::from_secs(15));
    }

    #[test]
    #[should_panic(expected = "entry_radius_m")]
    fn validate_rejects_inverted_radii() {
        let config = minimal_config("poll:\n  entry_radius_m: 80.0\n  exit_radius_m: 60.0\n");
        config.validate();
    }

    #[test]
    #[should_panic(expected = "Unknown timezone")]
    fn validate_rejects_bad_timezone() {
        let config = minimal_config("timezone: Mars/Olympus\n");
        config.validate();
    }
}
