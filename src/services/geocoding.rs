/// Reverse-geocode resolution with a single-worker queue and TTL cache
///
/// Address enrichment is best-effort: every failure mode resolves to `None`
/// so a missing address can never block status computation or map
/// placement. All lookups, from every caller, serialize through one worker
/// that enforces a minimum spacing between outbound requests - the upstream
/// provider enforces a global quota, not a per-client one.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::services::geo;

/// Cache keys round coordinates to 1e-6 degrees (~0.11 m), so jittering
/// fixes of a parked vehicle collapse onto one entry.
const KEY_SCALE: f64 = 1_000_000.0;

/// Above this many entries the worker prunes expired ones before inserting.
const CACHE_PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

/// External reverse-geocoding provider: coordinates to structured address.
#[async_trait]
pub trait ReverseGeocodeProvider: Send + Sync + 'static {
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct GeocoderSettings {
    /// Minimum spacing between outbound provider requests
    pub min_spacing: Duration,
    /// How long a resolved address stays cached
    pub cache_ttl: Duration,
    /// Bound on queued lookups
    pub queue_capacity: usize,
    /// How many batch callers await in flight at once
    pub batch_chunk_size: usize,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(1000),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            queue_capacity: 1024,
            batch_chunk_size: 10,
        }
    }
}

struct GeocodeJob {
    key: (i64, i64),
    lat: f64,
    lon: f64,
    reply: oneshot::Sender<Option<String>>,
}

struct CacheEntry {
    address: String,
    resolved_at: Instant,
}

type AddressCache = Arc<RwLock<HashMap<(i64, i64), CacheEntry>>>;

/// Handle to the shared geocoding queue. Cheap to clone.
#[derive(Clone)]
pub struct ReverseGeocoder {
    tx: mpsc::Sender<GeocodeJob>,
    cache: AddressCache,
    settings: GeocoderSettings,
}

impl ReverseGeocoder {
    /// Spawn the worker task and return a handle to it.
    pub fn spawn<P: ReverseGeocodeProvider>(provider: P, settings: GeocoderSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let cache: AddressCache = Arc::new(RwLock::new(HashMap::new()));

        let worker_cache = cache.clone();
        let worker_settings = settings.clone();
        tokio::spawn(async move {
            run_worker(provider, rx, worker_cache, worker_settings).await;
        });

        Self {
            tx,
            cache,
            settings,
        }
    }

    /// Resolve a human-readable address for the given coordinates.
    ///
    /// Returns `None` for coordinates the validator rejects (including the
    /// origin sentinel), on provider failure, and when the worker is gone.
    /// Never returns an error and always eventually settles.
    pub async fn resolve_address(&self, lat: f64, lon: f64) -> Option<String> {
        if !geo::is_valid_position(lat, lon) {
            debug!(lat, lon, "Rejected unmappable coordinates for geocoding");
            return None;
        }

        let key = cache_key(lat, lon);
        if let Some(address) = self.cached(key).await {
            return Some(address);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = GeocodeJob {
            key,
            lat,
            lon,
            reply: reply_tx,
        };

        if self.tx.send(job).await.is_err() {
            warn!("Geocode worker is gone, resolving to no address");
            return None;
        }

        reply_rx.await.unwrap_or(None)
    }

    /// Resolve addresses for a list of (id, lat, lon) triples.
    ///
    /// Fans everything through the same single-worker queue; chunking only
    /// bounds how many callers await at once, it does not bypass the
    /// throttle. Every input id is present in the result.
    pub async fn resolve_batch(&self, items: &[(String, f64, f64)]) -> HashMap<String, Option<String>> {
        let mut results = HashMap::with_capacity(items.len());

        for chunk in items.chunks(self.settings.batch_chunk_size.max(1)) {
            let lookups = chunk
                .iter()
                .map(|(id, lat, lon)| async move { (id.clone(), self.resolve_address(*lat, *lon).await) });
            for (id, address) in futures::future::join_all(lookups).await {
                results.insert(id, address);
            }
        }

        results
    }

    async fn cached(&self, key: (i64, i64)) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(&key)
            .filter(|entry| entry.resolved_at.elapsed() < self.settings.cache_ttl)
            .map(|entry| entry.address.clone())
    }
}

fn cache_key(lat: f64, lon: f64) -> (i64, i64) {
    ((lat * KEY_SCALE).round() as i64, (lon * KEY_SCALE).round() as i64)
}

/// Sole mutator of the cache and sole issuer of provider requests.
async fn run_worker<P: ReverseGeocodeProvider>(
    provider: P,
    mut rx: mpsc::Receiver<GeocodeJob>,
    cache: AddressCache,
    settings: GeocoderSettings,
) {
    let mut last_request: Option<Instant> = None;

    while let Some(job) = rx.recv().await {
        // A duplicate queued behind the request that resolved it gets the
        // cached answer without spending a provider call.
        let hit = {
            let cache = cache.read().await;
            cache
                .get(&job.key)
                .filter(|entry| entry.resolved_at.elapsed() < settings.cache_ttl)
                .map(|entry| entry.address.clone())
        };
        if let Some(address) = hit {
            let _ = job.reply.send(Some(address));
            continue;
        }

        if let Some(last) = last_request {
            let elapsed = last.elapsed();
            if elapsed < settings.min_spacing {
                tokio::time::sleep(settings.min_spacing - elapsed).await;
            }
        }
        last_request = Some(Instant::now());

        let address = match provider.reverse(job.lat, job.lon).await {
            Ok(address) => address,
            Err(e) => {
                // Failures are not cached so a later sweep may retry
                warn!(lat = job.lat, lon = job.lon, error = %e, "Reverse geocode failed, resolving to no address");
                None
            }
        };

        if let Some(ref resolved) = address {
            let mut cache = cache.write().await;
            if cache.len() >= CACHE_PRUNE_THRESHOLD {
                let ttl = settings.cache_ttl;
                cache.retain(|_, entry| entry.resolved_at.elapsed() < ttl);
            }
            cache.insert(
                job.key,
                CacheEntry {
                    address: resolved.clone(),
                    resolved_at: Instant::now(),
                },
            );
        }

        let _ = job.reply.send(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockProvider {
        calls: Arc<Mutex<Vec<Instant>>>,
        fail: bool,
    }

    impl MockProvider {
        fn new() -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: calls.clone(),
                    fail: false,
                },
                calls,
            )
        }

        fn failing() -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: calls.clone(),
                    fail: true,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl ReverseGeocodeProvider for MockProvider {
        async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, GeocodeError> {
            self.calls.lock().unwrap().push(Instant::now());
            if self.fail {
                return Err(GeocodeError::NetworkError("connection reset".into()));
            }
            Ok(Some(format!("{:.4}, {:.4}", lat, lon)))
        }
    }

    fn test_settings() -> GeocoderSettings {
        GeocoderSettings {
            min_spacing: Duration::from_millis(1000),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            queue_capacity: 64,
            batch_chunk_size: 4,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn worker_enforces_minimum_spacing() {
        let (provider, calls) = MockProvider::new();
        let geocoder = ReverseGeocoder::spawn(provider, test_settings());

        let lookups = [
            (27.70, 85.30),
            (27.71, 85.31),
            (27.72, 85.32),
        ];
        let results = futures::future::join_all(
            lookups
                .iter()
                .map(|(lat, lon)| geocoder.resolve_address(*lat, *lon)),
        )
        .await;
        assert!(results.iter().all(|r| r.is_some()));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_coordinates_hit_the_cache() {
        let (provider, calls) = MockProvider::new();
        let geocoder = ReverseGeocoder::spawn(provider, test_settings());

        let first = geocoder.resolve_address(27.7, 85.3).await;
        // Sub-rounding jitter maps to the same key
        let second = geocoder.resolve_address(27.7000001, 85.3000002).await;

        assert_eq!(first, second);
        assert!(first.is_some());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire_after_ttl() {
        let (provider, calls) = MockProvider::new();
        let geocoder = ReverseGeocoder::spawn(provider, test_settings());

        geocoder.resolve_address(27.7, 85.3).await;
        tokio::time::advance(Duration::from_secs(25 * 60 * 60)).await;
        geocoder.resolve_address(27.7, 85.3).await;

        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_coordinates_never_reach_the_provider() {
        let (provider, calls) = MockProvider::new();
        let geocoder = ReverseGeocoder::spawn(provider, test_settings());

        assert_eq!(geocoder.resolve_address(0.0, 0.0).await, None);
        assert_eq!(geocoder.resolve_address(91.0, 10.0).await, None);
        assert_eq!(geocoder.resolve_address(f64::NAN, 10.0).await, None);

        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failure_resolves_to_none_and_is_retried() {
        let (provider, calls) = MockProvider::failing();
        let geocoder = ReverseGeocoder::spawn(provider, test_settings());

        assert_eq!(geocoder.resolve_address(27.7, 85.3).await, None);
        // Failures are not cached, so the next lookup tries again
        assert_eq!(geocoder.resolve_address(27.7, 85.3).await, None);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_returns_every_id() {
        let (provider, _calls) = MockProvider::new();
        let geocoder = ReverseGeocoder::spawn(provider, test_settings());

        let items = vec![
            ("a".to_string(), 27.7, 85.3),
            ("b".to_string(), 0.0, 0.0),
            ("c".to_string(), -33.86, 151.2),
        ];
        let results = geocoder.resolve_batch(&items).await;

        assert_eq!(results.len(), 3);
        assert!(results["a"].is_some());
        assert_eq!(results["b"], None);
        assert!(results["c"].is_some());
    }
}
