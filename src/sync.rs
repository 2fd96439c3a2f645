/// Background synchronization of the vehicle state cache
///
/// Three independent loops share the cache: a low-frequency poller that
/// reloads the full snapshot, a consumer draining push envelopes through
/// the event router, and a sweep that re-resolves coordinates for unplaced
/// devices and enriches placed ones with addresses. All external I/O
/// happens out here; the cache only ever sees short in-memory mutations.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::TrackingConfig;
use crate::models::{PushEnvelope, TelemetryRecord};
use crate::providers::fleet_api::{FleetApiClient, FleetApiError};
use crate::services::fallback;
use crate::services::geocoding::ReverseGeocoder;
use crate::services::push::PushRouter;
use crate::services::tracker::VehicleStateCache;

const STARTUP_MAX_RETRIES: u32 = 5;

pub struct SyncManager {
    api: Arc<FleetApiClient>,
    cache: Arc<VehicleStateCache>,
    geocoder: ReverseGeocoder,
    router: PushRouter,
    tracking: TrackingConfig,
}

impl SyncManager {
    pub fn new(
        api: Arc<FleetApiClient>,
        cache: Arc<VehicleStateCache>,
        geocoder: ReverseGeocoder,
        tracking: TrackingConfig,
    ) -> Self {
        let router = PushRouter::new(cache.clone());
        Self {
            api,
            cache,
            geocoder,
            router,
            tracking,
        }
    }

    /// Start the background loops. Runs until the process shuts down; a
    /// closed push channel only stops event delivery, the cache keeps its
    /// last-known state.
    pub async fn start(self: Arc<Self>, mut push_rx: mpsc::Receiver<PushEnvelope>) {
        info!("Starting sync manager");

        // Initial snapshot with backoff so the API coming up late does not
        // leave us serving an empty cache forever
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.refresh_snapshot().await {
                Ok(()) => break,
                Err(e) => {
                    if attempt >= STARTUP_MAX_RETRIES {
                        error!(error = %e, attempts = attempt, "Initial snapshot failed, continuing with empty cache");
                        break;
                    }
                    let wait_secs = 5 * attempt as u64;
                    error!(error = %e, attempt, wait_secs, "Initial snapshot failed, retrying...");
                    tokio::time::sleep(tokio::time::Duration::from_secs(wait_secs)).await;
                }
            }
        }

        // Snapshot poll loop
        let poll_self = self.clone();
        let poll_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                poll_self.tracking.poll_interval_secs,
            ));
            // Skip the first tick which fires immediately (we already loaded above)
            interval.tick().await;

            loop {
                interval.tick().await;
                if let Err(e) = poll_self.refresh_snapshot().await {
                    // Keep the previous cache; last-known-good beats blanking the UI
                    error!(error = %e, "Snapshot refresh failed, keeping previous state");
                }
            }
        });

        // Push event loop
        let push_self = self.clone();
        let push_handle = tokio::spawn(async move {
            while let Some(envelope) = push_rx.recv().await {
                push_self.router.route(envelope).await;
            }
            info!("Push channel closed, event delivery stopped");
        });

        // Fallback/address sweep loop
        let sweep_self = self.clone();
        let sweep_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                sweep_self.tracking.sweep_interval_secs,
            ));

            loop {
                interval.tick().await;
                sweep_self.sweep().await;
            }
        });

        let _ = tokio::join!(poll_handle, push_handle, sweep_handle);
    }

    /// Fetch and fuse a full snapshot. Only a fully successful fetch
    /// replaces the cache.
    async fn refresh_snapshot(&self) -> Result<(), FleetApiError> {
        let devices = self.api.list_devices().await?;
        let telemetry = by_imei(self.api.latest_telemetry().await?);
        let valid_fixes = by_imei(self.api.latest_valid_telemetry().await?);

        info!(
            devices = devices.len(),
            telemetry_records = telemetry.len(),
            valid_fixes = valid_fixes.len(),
            "Loaded fleet snapshot"
        );

        self.cache
            .load_snapshot(devices, &telemetry, &valid_fixes)
            .await;
        Ok(())
    }

    /// Re-run the fallback resolver for devices still off the map, then
    /// enrich placed devices with addresses. Throttling comes from the
    /// geocode queue this feeds into, not from the sweep itself.
    async fn sweep(&self) {
        let unplaced = self.cache.unplaced_devices().await;
        let mut placed = 0;
        for imei in &unplaced {
            let resolved = fallback::resolve(None, None, imei, self.api.as_ref()).await;
            if let Some((lat, lon)) = resolved.coords {
                self.cache.apply_fallback_fix(imei, lat, lon).await;
                placed += 1;
            }
        }

        let needing_address = self.cache.devices_needing_address().await;
        let resolved = self.geocoder.resolve_batch(&needing_address).await;
        let mut enriched = 0;
        for (imei, address) in resolved {
            if let Some(address) = address {
                self.cache.set_address(&imei, address).await;
                enriched += 1;
            }
        }

        if !unplaced.is_empty() || !needing_address.is_empty() {
            debug!(
                unplaced = unplaced.len(),
                placed,
                address_candidates = needing_address.len(),
                enriched,
                "Completed device sweep"
            );
        }
    }
}

fn by_imei(records: Vec<TelemetryRecord>) -> HashMap<String, TelemetryRecord> {
    records
        .into_iter()
        .map(|record| (record.imei.clone(), record))
        .collect()
}
