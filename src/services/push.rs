/// Push event routing
///
/// Demultiplexes the incoming named-event stream into typed handlers. Each
/// event type performs a partial update of one cache entry through the
/// tracker's merge-patch path; the router itself owns no state.
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{de, LegacyCombinedUpdate, LocationUpdate, PushEnvelope, StatusUpdate};
use crate::services::tracker::VehicleStateCache;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
    #[error("Payload missing device identifier")]
    MissingImei,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// A typed push event, addressed to one device.
#[derive(Debug)]
pub enum PushEvent {
    Location { imei: String, update: LocationUpdate },
    Status { imei: String, update: StatusUpdate },
    LegacyCombined { imei: String, update: LegacyCombinedUpdate },
    Connectivity { imei: String, connected: bool },
}

/// Payload of a `device_status` connectivity event.
#[derive(Debug, Deserialize)]
struct ConnectivityPayload {
    #[serde(default, deserialize_with = "de::lenient_bool")]
    connected: Option<bool>,
}

impl PushEvent {
    /// Parse an envelope into a typed event.
    ///
    /// The device identifier and, for connectivity, the connected flag are
    /// the only hard requirements; every other malformed field degrades to
    /// absent inside the payload deserializers.
    pub fn parse(envelope: &PushEnvelope) -> Result<Self, PushError> {
        let imei = envelope
            .data
            .get("imei")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(PushError::MissingImei)?;

        match envelope.event.as_str() {
            "location_update" => {
                let update: LocationUpdate = serde_json::from_value(envelope.data.clone())
                    .map_err(|e| PushError::MalformedPayload(e.to_string()))?;
                Ok(PushEvent::Location { imei, update })
            }
            "status_update" => {
                let update: StatusUpdate = serde_json::from_value(envelope.data.clone())
                    .map_err(|e| PushError::MalformedPayload(e.to_string()))?;
                Ok(PushEvent::Status { imei, update })
            }
            "gps_update" => {
                let update: LegacyCombinedUpdate = serde_json::from_value(envelope.data.clone())
                    .map_err(|e| PushError::MalformedPayload(e.to_string()))?;
                Ok(PushEvent::LegacyCombined { imei, update })
            }
            "device_status" => {
                let payload: ConnectivityPayload = serde_json::from_value(envelope.data.clone())
                    .map_err(|e| PushError::MalformedPayload(e.to_string()))?;
                let connected = payload.connected.ok_or_else(|| {
                    PushError::MalformedPayload("missing connected flag".to_string())
                })?;
                Ok(PushEvent::Connectivity { imei, connected })
            }
            other => Err(PushError::UnknownEvent(other.to_string())),
        }
    }
}

/// Routes parsed push events into the cache.
#[derive(Clone)]
pub struct PushRouter {
    cache: Arc<VehicleStateCache>,
}

impl PushRouter {
    pub fn new(cache: Arc<VehicleStateCache>) -> Self {
        Self { cache }
    }

    /// Apply one envelope. Malformed or unknown envelopes are logged and
    /// skipped; nothing here is fatal to the stream.
    pub async fn route(&self, envelope: PushEnvelope) {
        let event = match PushEvent::parse(&envelope) {
            Ok(event) => event,
            Err(PushError::UnknownEvent(name)) => {
                debug!(event = %name, "Skipping unknown push event type");
                return;
            }
            Err(e) => {
                warn!(event = %envelope.event, error = %e, "Skipping malformed push event");
                return;
            }
        };

        match event {
            PushEvent::Location { imei, update } => {
                self.cache.apply_location_update(&imei, update).await;
            }
            PushEvent::Status { imei, update } => {
                self.cache.apply_status_update(&imei, update).await;
            }
            PushEvent::LegacyCombined { imei, update } => {
                self.cache.apply_legacy_combined_update(&imei, update).await;
            }
            PushEvent::Connectivity { imei, connected } => {
                self.cache.apply_connectivity_event(&imei, connected).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, TelemetryRecord, VehicleStatus};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn envelope(event: &str, data: serde_json::Value) -> PushEnvelope {
        PushEnvelope {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn parses_location_update() {
        let env = envelope(
            "location_update",
            json!({
                "imei": "862000000000001",
                "latitude": 27.7,
                "longitude": 85.3,
                "speed": 42.5,
                "timestamp": "2026-08-30T10:00:00Z"
            }),
        );

        match PushEvent::parse(&env).unwrap() {
            PushEvent::Location { imei, update } => {
                assert_eq!(imei, "862000000000001");
                assert_eq!(update.latitude, Some(27.7));
                assert_eq!(update.speed, Some(42.5));
                assert!(update.timestamp.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn malformed_numeric_fields_degrade_to_absent() {
        let env = envelope(
            "status_update",
            json!({
                "imei": "862000000000001",
                "speed": "not-a-number",
                "ignition": "on",
                "timestamp": "garbage"
            }),
        );

        match PushEvent::parse(&env).unwrap() {
            PushEvent::Status { update, .. } => {
                assert_eq!(update.speed, None);
                assert_eq!(update.ignition, Some(true));
                assert_eq!(update.timestamp, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn status_payload_carries_connection_state_and_distinct_substructures() {
        let env = envelope(
            "status_update",
            json!({
                "imei": "862000000000001",
                "speed": 10.0,
                "connectionState": false,
                "batteryInfo": { "level": 80 },
                "deviceStatusInfo": { "charging": true },
                "alarm": { "type": "sos" }
            }),
        );

        match PushEvent::parse(&env).unwrap() {
            PushEvent::Status { update, .. } => {
                assert_eq!(update.connection_state, Some(false));
                assert_eq!(update.battery, Some(json!({ "level": 80 })));
                assert_eq!(update.device_status, Some(json!({ "charging": true })));
                assert_eq!(update.alarm, Some(json!({ "type": "sos" })));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn missing_imei_is_rejected() {
        let env = envelope("location_update", json!({ "latitude": 1.0 }));
        assert!(matches!(
            PushEvent::parse(&env),
            Err(PushError::MissingImei)
        ));
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        let env = envelope("engine_diagnostics", json!({ "imei": "x" }));
        assert!(matches!(
            PushEvent::parse(&env),
            Err(PushError::UnknownEvent(_))
        ));
    }

    #[test]
    fn connectivity_accepts_numeric_flag() {
        let env = envelope("device_status", json!({ "imei": "x", "connected": 1 }));
        match PushEvent::parse(&env).unwrap() {
            PushEvent::Connectivity { connected, .. } => assert!(connected),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn router_applies_events_end_to_end() {
        let cache = Arc::new(VehicleStateCache::new(60.0));
        let telemetry: HashMap<_, _> = [(
            "A".to_string(),
            TelemetryRecord {
                imei: "A".to_string(),
                latitude: Some(27.7),
                longitude: Some(85.3),
                speed: Some(0.0),
                course: None,
                altitude: None,
                ignition: Some(false),
                satellites: None,
                battery: None,
                signal: None,
                alarm: None,
                device_status: None,
                timestamp: Utc::now() - Duration::minutes(10),
            },
        )]
        .into();
        cache
            .load_snapshot(
                vec![Device {
                    imei: "A".to_string(),
                    name: "Truck A".to_string(),
                    category: None,
                }],
                &telemetry,
                &HashMap::new(),
            )
            .await;

        let router = PushRouter::new(cache.clone());
        router
            .route(envelope(
                "gps_update",
                json!({
                    "imei": "A",
                    "latitude": 27.71,
                    "longitude": 85.31,
                    "speed": 70.0,
                    "ignition": true,
                    "timestamp": Utc::now().to_rfc3339()
                }),
            ))
            .await;

        let a = cache.get("A").await.unwrap();
        assert_eq!(a.status, VehicleStatus::Overspeed);
        assert_eq!(a.latitude, Some(27.71));

        // A stream of junk must not disturb the cache
        router.route(envelope("bogus", json!({ "imei": "A" }))).await;
        router.route(envelope("location_update", json!({}))).await;
        assert_eq!(cache.get("A").await.unwrap().status, VehicleStatus::Overspeed);
    }
}
