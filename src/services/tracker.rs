/// Vehicle state cache
///
/// The single shared mutable resource of the engine: an in-memory map from
/// IMEI to a fused [`DeviceView`], seeded wholesale by snapshot loads and
/// patched in place by push events. Entries exist only after a snapshot has
/// created them; push events for unknown devices are dropped so a racing
/// event can never resurrect a revoked device.
///
/// All four push handlers funnel through one merge-patch primitive that
/// overwrites only the fields a given event type owns and recomputes the
/// derived status from whatever the merged state holds, so the final state
/// is order-independent across update types. Mutations are short critical
/// sections with no I/O inside the lock; subscribers are notified through a
/// broadcast channel after every mutation.
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::models::{
    Device, DeviceView, Ignition, LegacyCombinedUpdate, LocationUpdate, MapMarker, Provenance,
    StatusUpdate, TelemetryRecord, VehicleStatus,
};
use crate::services::{geo, status};

/// How many cache snapshots a slow subscriber may lag behind.
const SUBSCRIBER_BUFFER: usize = 64;

/// Partial update of one cache entry. `None` leaves a field untouched;
/// each event type populates only the fields it owns.
#[derive(Debug, Default)]
struct DevicePatch {
    /// Validated replacement coordinates. Invalid incoming coordinates are
    /// dropped before this point so existing ones are preserved.
    position: Option<(f64, f64)>,
    course: Option<f64>,
    altitude: Option<f64>,
    speed: Option<f64>,
    ignition: Option<Ignition>,
    timestamp: Option<chrono::DateTime<Utc>>,
    satellites: Option<u32>,
    battery: Option<serde_json::Value>,
    signal: Option<serde_json::Value>,
    alarm: Option<serde_json::Value>,
    device_status: Option<serde_json::Value>,
    /// Transport-state flag riding along with a telemetry event. Applied to
    /// `is_online` only; not a telemetry field, so it alone never marks the
    /// device as having data.
    online: Option<bool>,
}

impl DevicePatch {
    fn carries_telemetry(&self) -> bool {
        self.position.is_some()
            || self.course.is_some()
            || self.altitude.is_some()
            || self.speed.is_some()
            || self.ignition.is_some()
            || self.timestamp.is_some()
            || self.satellites.is_some()
            || self.battery.is_some()
            || self.signal.is_some()
            || self.alarm.is_some()
            || self.device_status.is_some()
    }
}

pub struct VehicleStateCache {
    devices: RwLock<HashMap<String, DeviceView>>,
    update_tx: broadcast::Sender<Arc<Vec<DeviceView>>>,
    overspeed_limit_kmh: f64,
}

impl VehicleStateCache {
    pub fn new(overspeed_limit_kmh: f64) -> Self {
        let (update_tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            devices: RwLock::new(HashMap::new()),
            update_tx,
            overspeed_limit_kmh,
        }
    }

    /// Subscribe to cache updates. Every mutation broadcasts the full
    /// current device list; a lagging or dropped receiver never affects
    /// other subscribers or the cache itself.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<DeviceView>>> {
        self.update_tx.subscribe()
    }

    /// Atomically replace the entire cache with freshly fused views.
    ///
    /// One view per device in the authoritative list, enriched with that
    /// device's latest telemetry and, when the live fix is unusable, its
    /// last known valid fix. Devices absent from the new snapshot are
    /// dropped; in-flight enrichment (address, fallback coordinates) for
    /// surviving devices is discarded and recomputed by the next sweep.
    /// Connectivity state survives because the snapshot source knows
    /// nothing about the push channel.
    pub async fn load_snapshot(
        &self,
        devices: Vec<Device>,
        telemetry: &HashMap<String, TelemetryRecord>,
        valid_fixes: &HashMap<String, TelemetryRecord>,
    ) {
        let now = Utc::now();
        let fused: HashMap<String, DeviceView> = devices
            .into_iter()
            .map(|device| {
                let view = self.fuse(device, telemetry, valid_fixes, now);
                (view.imei.clone(), view)
            })
            .collect();

        let snapshot = {
            let mut map = self.devices.write().await;
            let mut fused = fused;
            for (imei, view) in fused.iter_mut() {
                if let Some(previous) = map.get(imei) {
                    view.is_online = previous.is_online;
                }
            }
            *map = fused;
            sorted_views(&map)
        };
        self.notify(snapshot);
    }

    fn fuse(
        &self,
        device: Device,
        telemetry: &HashMap<String, TelemetryRecord>,
        valid_fixes: &HashMap<String, TelemetryRecord>,
        now: chrono::DateTime<Utc>,
    ) -> DeviceView {
        let record = telemetry.get(&device.imei);
        let has_data = record.is_some();

        let live = record.and_then(|r| geo::valid_pair(r.latitude, r.longitude));
        let (coords, provenance) = match live {
            Some(coords) => (Some(coords), Provenance::Live),
            None => match valid_fixes
                .get(&device.imei)
                .and_then(|r| geo::valid_pair(r.latitude, r.longitude))
            {
                Some(coords) => (Some(coords), Provenance::Fallback),
                None => (None, Provenance::None),
            },
        };

        let speed = record.and_then(|r| r.speed).unwrap_or(0.0);
        let ignition = Ignition::from_flag(record.and_then(|r| r.ignition));
        let last_update = record.map(|r| r.timestamp);

        DeviceView {
            imei: device.imei,
            name: device.name,
            category: device.category,
            latitude: coords.map(|(lat, _)| lat),
            longitude: coords.map(|(_, lon)| lon),
            course: record.and_then(|r| r.course),
            altitude: record.and_then(|r| r.altitude),
            provenance,
            speed,
            ignition,
            is_online: false,
            status: status::classify(
                speed,
                ignition,
                last_update,
                has_data,
                self.overspeed_limit_kmh,
                now,
            ),
            last_update,
            has_data,
            address: None,
            satellites: record.and_then(|r| r.satellites),
            battery: record.and_then(|r| r.battery.clone()),
            signal: record.and_then(|r| r.signal.clone()),
            alarm: record.and_then(|r| r.alarm.clone()),
            device_status: record.and_then(|r| r.device_status.clone()),
        }
    }

    /// Apply a `location_update`: position and motion fields only.
    pub async fn apply_location_update(&self, imei: &str, update: LocationUpdate) {
        self.apply_patch(
            imei,
            DevicePatch {
                position: geo::valid_pair(update.latitude, update.longitude),
                course: update.course,
                altitude: update.altitude,
                speed: update.speed,
                timestamp: update.timestamp,
                ..Default::default()
            },
        )
        .await;
    }

    /// Apply a `status_update`: motion, transport-state and device-health
    /// fields, existing coordinates preserved.
    pub async fn apply_status_update(&self, imei: &str, update: StatusUpdate) {
        self.apply_patch(
            imei,
            DevicePatch {
                speed: update.speed,
                ignition: update.ignition.map(|flag| Ignition::from_flag(Some(flag))),
                timestamp: update.timestamp,
                satellites: sat_count(update.satellites),
                battery: update.battery,
                signal: update.signal,
                alarm: update.alarm,
                device_status: update.device_status,
                online: update.connection_state,
                ..Default::default()
            },
        )
        .await;
    }

    /// Apply a legacy `gps_update` carrying both position and status
    /// fields. Coordinates that fail validation are dropped so the existing
    /// fix is never overwritten with garbage.
    pub async fn apply_legacy_combined_update(&self, imei: &str, update: LegacyCombinedUpdate) {
        self.apply_patch(
            imei,
            DevicePatch {
                position: geo::valid_pair(update.latitude, update.longitude),
                course: update.course,
                altitude: update.altitude,
                speed: update.speed,
                ignition: update.ignition.map(|flag| Ignition::from_flag(Some(flag))),
                timestamp: update.timestamp,
                satellites: sat_count(update.satellites),
                battery: update.battery,
                signal: update.signal,
                alarm: update.alarm,
                device_status: update.device_status,
                online: update.connection_state,
            },
        )
        .await;
    }

    /// Apply a push-channel connect/disconnect for one device.
    ///
    /// Updates `is_online` only. Operational status reflects GPS telemetry,
    /// not transport state, so it is deliberately not recomputed here.
    pub async fn apply_connectivity_event(&self, imei: &str, connected: bool) {
        let snapshot = {
            let mut map = self.devices.write().await;
            let Some(entry) = map.get_mut(imei) else {
                debug!(imei, "Connectivity event for unknown device, dropping");
                return;
            };
            entry.is_online = connected;
            sorted_views(&map)
        };
        self.notify(snapshot);
    }

    /// Merge one patch into an existing entry and recompute its status.
    /// No-op for unknown devices: entries are only ever created by a
    /// snapshot load.
    async fn apply_patch(&self, imei: &str, patch: DevicePatch) {
        let carries_telemetry = patch.carries_telemetry();
        let snapshot = {
            let mut map = self.devices.write().await;
            let Some(entry) = map.get_mut(imei) else {
                debug!(imei, "Push event for unknown device, dropping");
                return;
            };

            if let Some((lat, lon)) = patch.position {
                entry.latitude = Some(lat);
                entry.longitude = Some(lon);
                entry.provenance = Provenance::Live;
            }
            if let Some(course) = patch.course {
                entry.course = Some(course);
            }
            if let Some(altitude) = patch.altitude {
                entry.altitude = Some(altitude);
            }
            if let Some(speed) = patch.speed {
                entry.speed = speed.max(0.0);
            }
            if let Some(ignition) = patch.ignition {
                entry.ignition = ignition;
            }
            if let Some(timestamp) = patch.timestamp {
                entry.last_update = Some(timestamp);
            }
            if let Some(satellites) = patch.satellites {
                entry.satellites = Some(satellites);
            }
            if let Some(battery) = patch.battery {
                entry.battery = Some(battery);
            }
            if let Some(signal) = patch.signal {
                entry.signal = Some(signal);
            }
            if let Some(alarm) = patch.alarm {
                entry.alarm = Some(alarm);
            }
            if let Some(device_status) = patch.device_status {
                entry.device_status = Some(device_status);
            }
            if let Some(online) = patch.online {
                entry.is_online = online;
            }

            // A telemetry-bearing event proves the store has data now. A
            // patch whose every field failed lenient parsing (or that only
            // carried transport state) must not fabricate data out of
            // nothing, so the status stands.
            if carries_telemetry {
                entry.has_data = true;
                entry.status = status::classify(
                    entry.speed,
                    entry.ignition,
                    entry.last_update,
                    entry.has_data,
                    self.overspeed_limit_kmh,
                    Utc::now(),
                );
            }
            sorted_views(&map)
        };
        self.notify(snapshot);
    }

    /// Substitute a last-known-valid fix for a device still lacking usable
    /// coordinates. Skipped once the entry has a position so a sweep racing
    /// a live update never downgrades provenance.
    pub async fn apply_fallback_fix(&self, imei: &str, lat: f64, lon: f64) {
        let snapshot = {
            let mut map = self.devices.write().await;
            let Some(entry) = map.get_mut(imei) else {
                return;
            };
            if entry.latitude.is_some() && entry.longitude.is_some() {
                return;
            }
            entry.latitude = Some(lat);
            entry.longitude = Some(lon);
            entry.provenance = Provenance::Fallback;
            sorted_views(&map)
        };
        self.notify(snapshot);
    }

    /// Attach a resolved street address to a device.
    pub async fn set_address(&self, imei: &str, address: String) {
        let snapshot = {
            let mut map = self.devices.write().await;
            let Some(entry) = map.get_mut(imei) else {
                return;
            };
            entry.address = Some(address);
            sorted_views(&map)
        };
        self.notify(snapshot);
    }

    pub async fn get(&self, imei: &str) -> Option<DeviceView> {
        self.devices.read().await.get(imei).cloned()
    }

    pub async fn get_all(&self) -> Vec<DeviceView> {
        sorted_views(&*self.devices.read().await)
    }

    pub async fn counts_by_status(&self) -> HashMap<VehicleStatus, usize> {
        let map = self.devices.read().await;
        let mut counts = HashMap::new();
        for view in map.values() {
            *counts.entry(view.status).or_insert(0) += 1;
        }
        counts
    }

    /// Map-ready projection: only devices currently resolvable to valid
    /// coordinates, live or fallback.
    pub async fn map_markers(&self) -> Vec<MapMarker> {
        let map = self.devices.read().await;
        let mut markers: Vec<MapMarker> = map
            .values()
            .filter_map(|view| {
                let (lat, lon) = (view.latitude?, view.longitude?);
                Some(MapMarker {
                    imei: view.imei.clone(),
                    latitude: lat,
                    longitude: lon,
                    status: view.status,
                    provenance: view.provenance,
                    last_update: view.last_update,
                })
            })
            .collect();
        markers.sort_by(|a, b| a.imei.cmp(&b.imei));
        markers
    }

    /// Devices that could not be placed on the map, for the fallback sweep.
    pub async fn unplaced_devices(&self) -> Vec<String> {
        self.devices
            .read()
            .await
            .values()
            .filter(|view| view.latitude.is_none() || view.longitude.is_none())
            .map(|view| view.imei.clone())
            .collect()
    }

    /// Placed devices still missing an address, for geocode enrichment.
    pub async fn devices_needing_address(&self) -> Vec<(String, f64, f64)> {
        self.devices
            .read()
            .await
            .values()
            .filter(|view| view.address.is_none())
            .filter_map(|view| Some((view.imei.clone(), view.latitude?, view.longitude?)))
            .collect()
    }

    fn notify(&self, snapshot: Vec<DeviceView>) {
        // Err just means nobody is listening right now
        let _ = self.update_tx.send(Arc::new(snapshot));
    }
}

fn sorted_views(map: &HashMap<String, DeviceView>) -> Vec<DeviceView> {
    let mut views: Vec<DeviceView> = map.values().cloned().collect();
    views.sort_by(|a, b| a.imei.cmp(&b.imei));
    views
}

fn sat_count(raw: Option<f64>) -> Option<u32> {
    raw.filter(|s| s.is_finite() && *s >= 0.0).map(|s| s as u32)
}
