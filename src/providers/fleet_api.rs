/// Fleet API client: the authoritative snapshot source
///
/// Serves the periodic full reload (device list + latest telemetry per
/// device) and the per-device last-known-valid lookup used by the fallback
/// sweep. Transient failures (network, 429, 5xx) are retried with capped
/// exponential backoff; anything else surfaces to the poller, which keeps
/// the previous cache.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use crate::models::{Device, TelemetryRecord};
use crate::services::fallback::LastFixStore;

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone)]
pub struct FleetApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl FleetApiClient {
    pub fn new(base_url: String) -> Result<Self, FleetApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FleetApiError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// All devices the account may track.
    pub async fn list_devices(&self) -> Result<Vec<Device>, FleetApiError> {
        self.get_json("/devices").await
    }

    /// Latest telemetry record per device, in bulk.
    pub async fn latest_telemetry(&self) -> Result<Vec<TelemetryRecord>, FleetApiError> {
        self.get_json("/telemetry/latest").await
    }

    /// Latest record per device whose coordinates were valid, in bulk.
    pub async fn latest_valid_telemetry(&self) -> Result<Vec<TelemetryRecord>, FleetApiError> {
        self.get_json("/telemetry/latest-valid").await
    }

    /// Latest valid-coordinate record for one device, if any exists.
    pub async fn latest_valid_telemetry_for(
        &self,
        imei: &str,
    ) -> Result<Option<TelemetryRecord>, FleetApiError> {
        let url = format!("{}/devices/{}/telemetry/latest-valid", self.base_url, imei);
        let body = match self.execute_with_retry(&url).await {
            Ok(body) => body,
            Err(FleetApiError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| FleetApiError::ParseError(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FleetApiError> {
        let url = format!("{}{}", self.base_url, path);
        let body = self.execute_with_retry(&url).await?;
        serde_json::from_str(&body).map_err(|e| FleetApiError::ParseError(e.to_string()))
    }

    /// Execute a GET with retry for transient failures only.
    async fn execute_with_retry(&self, url: &str) -> Result<String, FleetApiError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = INITIAL_RETRY_DELAY_SECS * 2_u64.pow(attempt - 1);
                warn!(attempt, delay_secs = delay, url, "Retrying fleet API request...");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            match self.execute_request(url).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if e.is_retryable() {
                        warn!(attempt, url, error = %e, "Transient fleet API error, will retry");
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FleetApiError::NetworkError("Max retries exceeded".to_string())))
    }

    async fn execute_request(&self, url: &str) -> Result<String, FleetApiError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FleetApiError::NetworkError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FleetApiError::NetworkError(e.to_string()))?;

        if status.as_u16() == 404 {
            return Err(FleetApiError::NotFound);
        }

        if !status.is_success() {
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(FleetApiError::RetryableError(format!("HTTP {}", status)));
            }
            return Err(FleetApiError::NetworkError(format!(
                "HTTP {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        Ok(text)
    }
}

/// The fleet API doubles as the last-known-valid-position store for the
/// fallback resolver. Lookup failures are soft: the device just stays off
/// the map until the next sweep.
#[async_trait]
impl LastFixStore for FleetApiClient {
    async fn latest_valid_fix(&self, imei: &str) -> Option<TelemetryRecord> {
        match self.latest_valid_telemetry_for(imei).await {
            Ok(record) => record,
            Err(e) => {
                warn!(imei, error = %e, "Last-valid-fix lookup failed");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FleetApiError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Retryable error: {0}")]
    RetryableError(String),
    #[error("Resource not found")]
    NotFound,
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl FleetApiError {
    /// Check if this error is transient and should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetApiError::NetworkError(_) | FleetApiError::RetryableError(_)
        )
    }
}
