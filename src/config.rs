use serde::Deserialize;
use std::path::Path;
use tokio::time::Duration;

use crate::services::geocoding::GeocoderSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub fleet_api: FleetApiConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetApiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Full snapshot reload interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Fallback/address sweep interval for unplaced and unenriched devices
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Speed above which a vehicle classifies as Overspeed, in km/h
    #[serde(default = "default_overspeed_limit")]
    pub overspeed_limit_kmh: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            sweep_interval_secs: default_sweep_interval(),
            overspeed_limit_kmh: default_overspeed_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_url")]
    pub base_url: String,
    /// Identifying client header the provider's usage policy requires
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Global minimum spacing between provider requests
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_url(),
            user_agent: default_user_agent(),
            language: default_language(),
            min_spacing_ms: default_min_spacing_ms(),
            cache_ttl_hours: default_cache_ttl_hours(),
        }
    }
}

impl GeocoderConfig {
    pub fn settings(&self) -> GeocoderSettings {
        GeocoderSettings {
            min_spacing: Duration::from_millis(self.min_spacing_ms),
            cache_ttl: Duration::from_secs(self.cache_ttl_hours * 60 * 60),
            ..GeocoderSettings::default()
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_overspeed_limit() -> f64 {
    60.0
}

fn default_geocoder_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    "fleettrack-server/0.1 (fleet dashboard)".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_min_spacing_ms() -> u64 {
    1000
}

fn default_cache_ttl_hours() -> u64 {
    24
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
