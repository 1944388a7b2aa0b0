//! In-memory store implementations.
//!
//! Behavior-compatible stand-ins for the Redis stores, used by tests and by
//! local runs without infrastructure. They reproduce the semantics that
//! matter to callers: metadata TTLs, lock leases, sorted-set member
//! collapsing, and flag lookup order.

use crate::error::KvError;
use crate::flags::{FeatureFlagStore, FLAG_DEFAULTS};
use crate::geo_index::{DriverLocationUpdate, DriverMetadata, GeoIndex, DRIVER_TTL_SECONDS};
use crate::idempotency_cache::IdempotencyCache;
use crate::mutex::LockManager;
use crate::surge_window::{SurgeWindowStore, WindowEntry};
use async_trait::async_trait;
use chrono::Utc;
use rideflow_core::{DriverStatus, GLOBAL_TENANT};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ============================================================================
// Geo index
// ============================================================================

#[derive(Default)]
struct GeoState {
    /// region id → driver id → (lat, lng). Members are never evicted, like
    /// the Redis geo set; stale drivers are filtered out via metadata expiry.
    positions: HashMap<String, HashMap<String, (f64, f64)>>,
    metadata: HashMap<String, (DriverMetadata, Instant)>,
}

/// In-memory [`GeoIndex`].
#[derive(Default)]
pub struct InMemoryGeoIndex {
    state: Mutex<GeoState>,
}

impl InMemoryGeoIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GeoIndex for InMemoryGeoIndex {
    async fn upsert(&self, update: DriverLocationUpdate) -> Result<(), KvError> {
        let mut state = self.state.lock().expect("geo state poisoned");
        state
            .positions
            .entry(update.region_id.clone())
            .or_default()
            .insert(update.driver_id.clone(), (update.lat, update.lng));

        let meta = DriverMetadata {
            status: Some(update.status),
            tier: Some(update.tier),
            rating: Some(update.rating),
            decline_rate: Some(update.decline_rate),
            region_id: Some(update.region_id),
            last_seen: Some(Utc::now()),
        };
        let expires = Instant::now() + Duration::from_secs(DRIVER_TTL_SECONDS as u64);
        state.metadata.insert(update.driver_id, (meta, expires));
        Ok(())
    }

    async fn radius(
        &self,
        region_id: &str,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let state = self.state.lock().expect("geo state poisoned");
        let Some(region) = state.positions.get(region_id) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(String, f64)> = region
            .iter()
            .filter_map(|(driver_id, (d_lat, d_lng))| {
                let dist = rideflow_core::geo::haversine_km(lat, lng, *d_lat, *d_lng);
                (dist <= radius_km).then(|| (driver_id.clone(), dist))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn metadata(&self, driver_id: &str) -> Result<Option<DriverMetadata>, KvError> {
        let state = self.state.lock().expect("geo state poisoned");
        Ok(state.metadata.get(driver_id).and_then(|(meta, expires)| {
            (*expires > Instant::now()).then(|| meta.clone())
        }))
    }

    async fn set_status(&self, driver_id: &str, status: DriverStatus) -> Result<(), KvError> {
        let mut state = self.state.lock().expect("geo state poisoned");
        if let Some((meta, _)) = state.metadata.get_mut(driver_id) {
            meta.status = Some(status);
        }
        Ok(())
    }
}

// ============================================================================
// Lock manager
// ============================================================================

/// In-memory [`LockManager`] with real lease expiry.
#[derive(Default)]
pub struct InMemoryLockManager {
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_insert(&self, name: &str, token: &str, lease: Duration) -> bool {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let now = Instant::now();
        match locks.get(name) {
            Some((_, expires)) if *expires > now => false,
            _ => {
                locks.insert(name.to_string(), (token.to_string(), now + lease));
                true
            }
        }
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<String>, KvError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;
        loop {
            if self.try_insert(name, &token, lease) {
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn release(&self, name: &str, token: &str) -> Result<(), KvError> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        if locks.get(name).is_some_and(|(held, _)| held == token) {
            locks.remove(name);
        }
        Ok(())
    }

    async fn acquire_sentinel(&self, name: &str, ttl: Duration) -> Result<(), KvError> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks.insert(
            name.to_string(),
            ("sentinel".to_string(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn is_locked(&self, name: &str) -> Result<bool, KvError> {
        let locks = self.locks.lock().expect("lock table poisoned");
        Ok(locks
            .get(name)
            .is_some_and(|(_, expires)| *expires > Instant::now()))
    }
}

// ============================================================================
// Feature flags
// ============================================================================

/// In-memory [`FeatureFlagStore`].
#[derive(Default)]
pub struct InMemoryFeatureFlags {
    flags: Mutex<HashMap<String, HashMap<String, bool>>>,
}

impl InMemoryFeatureFlags {
    /// Creates an empty flag store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeatureFlagStore for InMemoryFeatureFlags {
    async fn is_enabled(&self, tenant_id: &str, flag: &str, default: bool) -> bool {
        let flags = self.flags.lock().expect("flag store poisoned");
        flags
            .get(tenant_id)
            .and_then(|t| t.get(flag))
            .or_else(|| flags.get(GLOBAL_TENANT).and_then(|t| t.get(flag)))
            .copied()
            .unwrap_or(default)
    }

    async fn set(&self, tenant_id: &str, flag: &str, value: bool) -> Result<(), KvError> {
        let mut flags = self.flags.lock().expect("flag store poisoned");
        flags
            .entry(tenant_id.to_string())
            .or_default()
            .insert(flag.to_string(), value);
        Ok(())
    }

    async fn init_defaults(&self, tenant_id: &str) -> Result<(), KvError> {
        let mut flags = self.flags.lock().expect("flag store poisoned");
        let tenant = flags.entry(tenant_id.to_string()).or_default();
        for (flag, value) in FLAG_DEFAULTS {
            tenant.entry(flag.to_string()).or_insert(value);
        }
        Ok(())
    }
}

// ============================================================================
// Surge window
// ============================================================================

#[derive(Default)]
struct SurgeState {
    /// cell id → member → score. Mirrors sorted-set semantics: re-adding an
    /// existing member only moves its score.
    windows: HashMap<String, HashMap<String, i64>>,
    cache: HashMap<String, (f64, Instant)>,
}

/// In-memory [`SurgeWindowStore`].
#[derive(Default)]
pub struct InMemorySurgeWindow {
    state: Mutex<SurgeState>,
}

impl InMemorySurgeWindow {
    /// Creates an empty window store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SurgeWindowStore for InMemorySurgeWindow {
    async fn record_snapshot(
        &self,
        cell_id: &str,
        drivers: u32,
        rides: u32,
        now_ms: i64,
        window: Duration,
    ) -> Result<Vec<WindowEntry>, KvError> {
        let mut state = self.state.lock().expect("surge state poisoned");
        let cell = state.windows.entry(cell_id.to_string()).or_default();
        cell.insert(format!("{drivers}:{rides}"), now_ms);

        let cutoff_ms = now_ms - window.as_millis() as i64;
        cell.retain(|_, score| *score >= cutoff_ms);

        let mut entries: Vec<(String, i64)> =
            cell.iter().map(|(m, s)| (m.clone(), *s)).collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        Ok(entries
            .iter()
            .filter_map(|(member, score)| {
                let (d, r) = member.split_once(':')?;
                Some(WindowEntry {
                    timestamp_ms: *score,
                    drivers: d.parse().ok()?,
                    rides: r.parse().ok()?,
                })
            })
            .collect())
    }

    async fn cache_multiplier(
        &self,
        cell_id: &str,
        multiplier: f64,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut state = self.state.lock().expect("surge state poisoned");
        state
            .cache
            .insert(cell_id.to_string(), (multiplier, Instant::now() + ttl));
        Ok(())
    }

    async fn cached_multiplier(&self, cell_id: &str) -> Result<Option<f64>, KvError> {
        let state = self.state.lock().expect("surge state poisoned");
        Ok(state
            .cache
            .get(cell_id)
            .and_then(|(value, expires)| (*expires > Instant::now()).then_some(*value)))
    }
}

// ============================================================================
// Idempotency cache
// ============================================================================

/// In-memory [`IdempotencyCache`].
#[derive(Default)]
pub struct InMemoryIdempotencyCache {
    values: Mutex<HashMap<(String, String), (String, Instant)>>,
}

impl InMemoryIdempotencyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, KvError> {
        let values = self.values.lock().expect("idempotency cache poisoned");
        Ok(values
            .get(&(service.to_string(), key.to_string()))
            .and_then(|(value, expires)| (*expires > Instant::now()).then(|| value.clone())))
    }

    async fn put(
        &self,
        service: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut values = self.values.lock().expect("idempotency cache poisoned");
        values.insert(
            (service.to_string(), key.to_string()),
            (value.to_string(), Instant::now() + ttl),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rideflow_core::VehicleTier;

    fn driver(id: &str, region: &str, lat: f64, lng: f64) -> DriverLocationUpdate {
        DriverLocationUpdate {
            driver_id: id.to_string(),
            region_id: region.to_string(),
            lat,
            lng,
            status: DriverStatus::Idle,
            tier: VehicleTier::Economy,
            rating: 4.5,
            decline_rate: 0.1,
        }
    }

    #[tokio::test]
    async fn radius_orders_by_distance_and_respects_region() {
        let geo = InMemoryGeoIndex::new();
        geo.upsert(driver("near", "ap-south-1", 12.9716, 77.5946))
            .await
            .unwrap();
        geo.upsert(driver("far", "ap-south-1", 12.9900, 77.6100))
            .await
            .unwrap();
        geo.upsert(driver("other-region", "eu-west-1", 12.9716, 77.5946))
            .await
            .unwrap();

        let hits = geo
            .radius("ap-south-1", 12.9716, 77.5946, 5.0, 50)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[tokio::test]
    async fn set_status_updates_without_touching_other_fields() {
        let geo = InMemoryGeoIndex::new();
        geo.upsert(driver("drv_1", "ap-south-1", 12.97, 77.59))
            .await
            .unwrap();
        geo.set_status("drv_1", DriverStatus::OnTrip).await.unwrap();

        let meta = geo.metadata("drv_1").await.unwrap().unwrap();
        assert_eq!(meta.status, Some(DriverStatus::OnTrip));
        assert_eq!(meta.rating, Some(4.5));
    }

    #[tokio::test]
    async fn second_acquire_waits_out_the_budget() {
        let locks = InMemoryLockManager::new();
        let token = locks
            .try_acquire("lock:ride:r1", Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap()
            .expect("first acquire should win");

        let second = locks
            .try_acquire("lock:ride:r1", Duration::from_millis(30), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.is_none());

        locks.release("lock:ride:r1", &token).await.unwrap();
        let third = locks
            .try_acquire("lock:ride:r1", Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn lease_expiry_releases_a_crashed_holder() {
        let locks = InMemoryLockManager::new();
        locks
            .try_acquire("lock:ride:r2", Duration::from_millis(5), Duration::from_millis(20))
            .await
            .unwrap()
            .expect("first acquire should win");

        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = locks
            .try_acquire("lock:ride:r2", Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(second.is_some(), "expired lease should be reacquirable");
    }

    #[tokio::test]
    async fn release_with_stale_token_is_a_noop() {
        let locks = InMemoryLockManager::new();
        let token = locks
            .try_acquire("lock:ride:r3", Duration::from_millis(5), Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // New holder takes over after expiry; the old token must not evict it.
        let _new_token = locks
            .try_acquire("lock:ride:r3", Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        locks.release("lock:ride:r3", &token).await.unwrap();
        assert!(locks.is_locked("lock:ride:r3").await.unwrap());
    }

    #[tokio::test]
    async fn flag_lookup_prefers_tenant_then_global_then_default() {
        let flags = InMemoryFeatureFlags::new();
        assert!(flags.is_enabled("acme", "surge_pricing_enabled", true).await);

        flags.set(GLOBAL_TENANT, "surge_pricing_enabled", false).await.unwrap();
        assert!(!flags.is_enabled("acme", "surge_pricing_enabled", true).await);

        flags.set("acme", "surge_pricing_enabled", true).await.unwrap();
        assert!(flags.is_enabled("acme", "surge_pricing_enabled", false).await);
    }

    #[tokio::test]
    async fn init_defaults_never_overwrites() {
        let flags = InMemoryFeatureFlags::new();
        flags.set("acme", "dispatch_kill_switch", true).await.unwrap();
        flags.init_defaults("acme").await.unwrap();

        assert!(flags.is_enabled("acme", "dispatch_kill_switch", false).await);
        assert!(flags.is_enabled("acme", "auto_payment_charge", false).await);
    }

    #[tokio::test]
    async fn window_trims_old_entries_and_orders_ascending() {
        let store = InMemorySurgeWindow::new();
        let window = Duration::from_secs(300);

        store.record_snapshot("cell", 10, 5, 50_000, window).await.unwrap();
        store.record_snapshot("cell", 8, 6, 200_000, window).await.unwrap();
        let entries = store
            .record_snapshot("cell", 6, 7, 400_000, window)
            .await
            .unwrap();

        // The 50 s entry falls out of the 5-minute window relative to 400 s.
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp_ms, 200_000);
        assert_eq!(entries[1].timestamp_ms, 400_000);
    }

    #[tokio::test]
    async fn duplicate_members_collapse_like_a_sorted_set() {
        let store = InMemorySurgeWindow::new();
        let window = Duration::from_secs(300);

        store.record_snapshot("cell", 10, 10, 1_000, window).await.unwrap();
        let entries = store
            .record_snapshot("cell", 10, 10, 2_000, window)
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp_ms, 2_000);
    }

    #[tokio::test]
    async fn multiplier_cache_expires() {
        let store = InMemorySurgeWindow::new();
        store
            .cache_multiplier("cell", 1.5, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.cached_multiplier("cell").await.unwrap(), Some(1.5));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.cached_multiplier("cell").await.unwrap(), None);
    }
}
