/// Shared data model for the fleet tracking engine
///
/// The central type is [`DeviceView`]: the fused, current view of one tracked
/// device, built from the periodic REST snapshot and patched in place by push
/// events. Wire-level records ([`Device`], [`TelemetryRecord`]) mirror what
/// the fleet API returns and are fused into views by the tracker.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Discrete operational status derived from telemetry.
///
/// Always computed by the classifier from (speed, ignition, data age,
/// has-data) - never set directly, and never influenced by push-channel
/// connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    /// The telemetry store has zero records for this device
    NoData,
    /// Latest data is at least an hour old
    Inactive,
    /// Standing still, ignition off
    Stop,
    /// Standing still, ignition on
    Idle,
    /// Moving above the GPS jitter floor
    Running,
    /// Moving above the configured overspeed limit
    Overspeed,
}

/// Ignition sensor reading. Some hardware never reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Ignition {
    On,
    Off,
    #[default]
    Unknown,
}

impl Ignition {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Ignition::On,
            Some(false) => Ignition::Off,
            None => Ignition::Unknown,
        }
    }
}

/// Whether displayed coordinates are the device's live fix or a substituted
/// last-known-valid fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Live,
    Fallback,
    #[default]
    None,
}

/// Device identity as returned by the fleet API device list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Device {
    /// Hardware identifier, primary key for tracked assets
    pub imei: String,
    /// Registration / display name
    pub name: String,
    /// Asset category, used only for icon selection
    pub category: Option<String>,
}

/// One telemetry record from the fleet API.
///
/// Every field except the identifier and data timestamp may be absent;
/// malformed numerics are treated as absent rather than failing the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub imei: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Speed in km/h, non-negative
    pub speed: Option<f64>,
    /// Course over ground in degrees
    pub course: Option<f64>,
    /// Altitude in meters
    pub altitude: Option<f64>,
    pub ignition: Option<bool>,
    pub satellites: Option<u32>,
    /// Opaque pass-through substructures, not part of core logic
    pub battery: Option<serde_json::Value>,
    pub signal: Option<serde_json::Value>,
    pub alarm: Option<serde_json::Value>,
    pub device_status: Option<serde_json::Value>,
    /// Data timestamp from the source record, not receipt time
    pub timestamp: DateTime<Utc>,
}

/// Fused, current view of one tracked device.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceView {
    pub imei: String,
    pub name: String,
    pub category: Option<String>,

    // Position: either both coordinates valid or both absent
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub course: Option<f64>,
    pub altitude: Option<f64>,
    pub provenance: Provenance,

    // Motion
    pub speed: f64,
    pub ignition: Ignition,

    /// Push-channel transport state, display only. Never feeds `status`.
    pub is_online: bool,

    /// Derived by the classifier after every mutation that touches its inputs
    pub status: VehicleStatus,
    /// Data timestamp of the most recent telemetry, if any
    pub last_update: Option<DateTime<Utc>>,
    /// Whether the telemetry store has any record for this device
    pub has_data: bool,

    // Enrichment
    pub address: Option<String>,
    pub satellites: Option<u32>,
    #[schema(value_type = Object)]
    pub battery: Option<serde_json::Value>,
    #[schema(value_type = Object)]
    pub signal: Option<serde_json::Value>,
    #[schema(value_type = Object)]
    pub alarm: Option<serde_json::Value>,
    #[schema(value_type = Object)]
    pub device_status: Option<serde_json::Value>,
}

/// Map-ready projection of a device with resolvable coordinates.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MapMarker {
    pub imei: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: VehicleStatus,
    pub provenance: Provenance,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VehicleListResponse {
    pub vehicles: Vec<DeviceView>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarkerListResponse {
    pub markers: Vec<MapMarker>,
    pub timestamp: String,
}

/// One frame from the push channel: a named event plus its JSON payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `location_update` push event. Owns position and motion
/// fields; never carries ignition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationUpdate {
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub course: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_datetime")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload of a `status_update` push event. Owns motion, transport-state
/// and device-health fields; never carries coordinates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusUpdate {
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_bool")]
    pub ignition: Option<bool>,
    /// Push-channel transport state riding along with the telemetry.
    /// Feeds `is_online` only, never the status classifier.
    #[serde(
        default,
        alias = "connectionState",
        deserialize_with = "de::lenient_bool"
    )]
    pub connection_state: Option<bool>,
    #[serde(default, deserialize_with = "de::lenient_datetime")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "battery_info", alias = "batteryInfo")]
    pub battery: Option<serde_json::Value>,
    #[serde(default, alias = "signal_info", alias = "signalInfo")]
    pub signal: Option<serde_json::Value>,
    #[serde(default)]
    pub alarm: Option<serde_json::Value>,
    #[serde(default, alias = "device_status_info", alias = "deviceStatusInfo")]
    pub device_status: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub satellites: Option<f64>,
}

/// Payload of a legacy `gps_update` event carrying position and status
/// fields in one message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCombinedUpdate {
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub course: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_bool")]
    pub ignition: Option<bool>,
    #[serde(
        default,
        alias = "connectionState",
        deserialize_with = "de::lenient_bool"
    )]
    pub connection_state: Option<bool>,
    #[serde(default, deserialize_with = "de::lenient_datetime")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "battery_info", alias = "batteryInfo")]
    pub battery: Option<serde_json::Value>,
    #[serde(default, alias = "signal_info", alias = "signalInfo")]
    pub signal: Option<serde_json::Value>,
    #[serde(default)]
    pub alarm: Option<serde_json::Value>,
    #[serde(default, alias = "device_status_info", alias = "deviceStatusInfo")]
    pub device_status: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub satellites: Option<f64>,
}

/// Lenient field deserializers implementing the malformed-telemetry policy:
/// a field that fails to parse is treated as absent, the rest of the update
/// proceeds.
pub(crate) mod de {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Bool(b) => Some(b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub fn lenient_datetime<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
            _ => None,
        })
    }
}
