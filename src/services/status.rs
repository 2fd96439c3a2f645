/// Operational status classification
///
/// Derives one of six discrete statuses from raw telemetry. Speed is the
/// primary signal because ignition sensors are unreliable on some hardware;
/// the 5 km/h floor absorbs GPS jitter at a standstill. Push-channel
/// connectivity is deliberately not an input: a device that drops off the
/// socket keeps showing its last GPS-derived status until the data itself
/// goes stale.
use chrono::{DateTime, Duration, Utc};

use crate::models::{Ignition, VehicleStatus};

/// Speed above which a vehicle is considered moving, in km/h.
pub const SPEED_FLOOR_KMH: f64 = 5.0;

/// Data older than this is no longer trusted to represent current state.
pub const STALE_AFTER_MINUTES: i64 = 60;

/// Used when the caller supplies a non-positive or missing overspeed limit.
pub const DEFAULT_OVERSPEED_KMH: f64 = 60.0;

/// Classify a device's operational status.
///
/// First match wins - the order encodes priority:
/// 1. no historical data at all -> `NoData`
/// 2. data at least an hour old -> `Inactive` (staleness beats motion)
/// 3. moving above the jitter floor -> `Running` / `Overspeed`
/// 4. standing with ignition on -> `Idle`
/// 5. otherwise -> `Stop` (unknown ignition behaves as off)
///
/// `speed` below zero or NaN is treated as 0. Pure; no failure modes.
pub fn classify(
    speed: f64,
    ignition: Ignition,
    last_fix_at: Option<DateTime<Utc>>,
    has_data: bool,
    overspeed_limit_kmh: f64,
    now: DateTime<Utc>,
) -> VehicleStatus {
    if !has_data {
        return VehicleStatus::NoData;
    }

    if let Some(last_fix_at) = last_fix_at {
        if now - last_fix_at >= Duration::minutes(STALE_AFTER_MINUTES) {
            return VehicleStatus::Inactive;
        }
    }

    let speed = if speed.is_nan() { 0.0 } else { speed.max(0.0) };
    let limit = if overspeed_limit_kmh > 0.0 {
        overspeed_limit_kmh
    } else {
        DEFAULT_OVERSPEED_KMH
    };

    if speed > SPEED_FLOOR_KMH {
        if speed > limit {
            return VehicleStatus::Overspeed;
        }
        return VehicleStatus::Running;
    }

    if ignition == Ignition::On {
        return VehicleStatus::Idle;
    }

    VehicleStatus::Stop
}
