/// Nominatim-style reverse geocoding provider
///
/// One HTTP GET per lookup, called with an identifying User-Agent and a
/// language preference as the upstream usage policy requires. Rate limiting
/// lives in the geocoding queue worker, not here.
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::services::geocoding::{GeocodeError, ReverseGeocodeProvider};

#[derive(Debug, Deserialize)]
struct NominatimReverseResponse {
    display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    language: String,
}

impl NominatimClient {
    pub fn new(
        base_url: String,
        user_agent: String,
        language: String,
    ) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GeocodeError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent,
            language,
        })
    }
}

#[async_trait]
impl ReverseGeocodeProvider for NominatimClient {
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let lat_param = format!("{:.6}", lat);
        let lon_param = format!("{:.6}", lon);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", lat_param.as_str()),
                ("lon", lon_param.as_str()),
                ("format", "jsonv2"),
                ("zoom", "17"),
            ])
            .header("User-Agent", &self.user_agent)
            .header("Accept-Language", &self.language)
            .send()
            .await
            .map_err(|e| GeocodeError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::NetworkError(format!("HTTP {}", status)));
        }

        let parsed: NominatimReverseResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::ParseError(e.to_string()))?;

        debug!(lat, lon, address = ?parsed.display_name, "Reverse geocoded");
        Ok(parsed.display_name)
    }
}
