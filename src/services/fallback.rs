/// Coordinate fallback resolution
///
/// Given a device's live coordinates (possibly absent or invalid), returns
/// the best available coordinates for mapping. Live data that passes
/// validation wins outright; otherwise the persisted last-known-valid store
/// is consulted. Devices with neither stay off the map but remain present
/// in list views.
use async_trait::async_trait;

use crate::models::{Provenance, TelemetryRecord};
use crate::services::geo;

/// Backing store tracking, per device, the most recent record whose
/// coordinates were valid. Maintained externally; lookups are best-effort
/// and resolve transient failures to `None`.
#[async_trait]
pub trait LastFixStore: Send + Sync {
    async fn latest_valid_fix(&self, imei: &str) -> Option<TelemetryRecord>;
}

/// Outcome of a fallback resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPosition {
    pub coords: Option<(f64, f64)>,
    pub provenance: Provenance,
}

impl ResolvedPosition {
    pub fn unplaced() -> Self {
        Self {
            coords: None,
            provenance: Provenance::None,
        }
    }
}

/// Resolve the best coordinates for a device.
///
/// Valid live coordinates are returned without touching the store. The
/// store is only consulted when live data is unusable; a record it returns
/// is re-validated before being trusted.
pub async fn resolve(
    latitude: Option<f64>,
    longitude: Option<f64>,
    imei: &str,
    store: &dyn LastFixStore,
) -> ResolvedPosition {
    if let Some(coords) = geo::valid_pair(latitude, longitude) {
        return ResolvedPosition {
            coords: Some(coords),
            provenance: Provenance::Live,
        };
    }

    match store.latest_valid_fix(imei).await {
        Some(record) => match geo::valid_pair(record.latitude, record.longitude) {
            Some(coords) => ResolvedPosition {
                coords: Some(coords),
                provenance: Provenance::Fallback,
            },
            None => ResolvedPosition::unplaced(),
        },
        None => ResolvedPosition::unplaced(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingStore {
        fix: Option<TelemetryRecord>,
        calls: AtomicUsize,
    }

    impl RecordingStore {
        fn new(fix: Option<TelemetryRecord>) -> Self {
            Self {
                fix,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LastFixStore for RecordingStore {
        async fn latest_valid_fix(&self, _imei: &str) -> Option<TelemetryRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fix.clone()
        }
    }

    fn fix_at(lat: f64, lon: f64) -> TelemetryRecord {
        TelemetryRecord {
            imei: "862000000000001".into(),
            latitude: Some(lat),
            longitude: Some(lon),
            speed: Some(0.0),
            course: None,
            altitude: None,
            ignition: Some(false),
            satellites: None,
            battery: None,
            signal: None,
            alarm: None,
            device_status: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn valid_live_coords_never_consult_store() {
        let store = RecordingStore::new(Some(fix_at(10.0, 20.0)));
        let resolved = resolve(Some(27.7), Some(85.3), "862000000000001", &store).await;

        assert_eq!(resolved.coords, Some((27.7, 85.3)));
        assert_eq!(resolved.provenance, Provenance::Live);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_live_coords_fall_back_to_store() {
        let store = RecordingStore::new(Some(fix_at(27.7, 85.3)));
        let resolved = resolve(Some(0.0), Some(0.0), "862000000000001", &store).await;

        assert_eq!(resolved.coords, Some((27.7, 85.3)));
        assert_eq!(resolved.provenance, Provenance::Fallback);
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_coords_with_empty_store_is_unplaced() {
        let store = RecordingStore::new(None);
        let resolved = resolve(None, None, "862000000000001", &store).await;

        assert_eq!(resolved.coords, None);
        assert_eq!(resolved.provenance, Provenance::None);
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn garbage_store_record_is_not_trusted() {
        let store = RecordingStore::new(Some(fix_at(0.0, 0.0)));
        let resolved = resolve(None, None, "862000000000001", &store).await;

        assert_eq!(resolved.coords, None);
        assert_eq!(resolved.provenance, Provenance::None);
    }
}
