//! Surge service flows against the in-memory window and audit stores.

use chrono::Utc;
use rideflow_core::events::SupplyDemandSnapshotEvent;
use rideflow_kv::memory::{InMemoryFeatureFlags, InMemorySurgeWindow};
use rideflow_kv::{flags, FeatureFlagStore, SurgeWindowStore};
use rideflow_surge::memory::InMemorySurgeCellStore;
use rideflow_surge::{GeoCellRecord, SurgeCellStore, SurgeService};
use std::sync::Arc;

struct Harness {
    window: Arc<InMemorySurgeWindow>,
    cells: Arc<InMemorySurgeCellStore>,
    flags: Arc<InMemoryFeatureFlags>,
    service: SurgeService,
}

fn harness() -> Harness {
    let window = Arc::new(InMemorySurgeWindow::new());
    let cells = Arc::new(InMemorySurgeCellStore::new());
    let flags = Arc::new(InMemoryFeatureFlags::new());
    let service = SurgeService::new(window.clone(), cells.clone(), flags.clone());
    Harness {
        window,
        cells,
        flags,
        service,
    }
}

fn snapshot(cell: &str, drivers: u32, rides: u32) -> SupplyDemandSnapshotEvent {
    SupplyDemandSnapshotEvent {
        geo_cell: cell.to_string(),
        region_id: "ap-south-1".to_string(),
        tenant_id: "default".to_string(),
        active_drivers: drivers,
        pending_rides: rides,
        computed_at: Utc::now(),
    }
}

#[tokio::test]
async fn balanced_snapshots_hold_the_multiplier_at_one() {
    let h = harness();
    for _ in 0..3 {
        let m = h.service.process_snapshot(&snapshot("cell-1", 10, 10)).await.unwrap();
        assert_eq!(m, 1.0);
    }
    assert_eq!(h.service.get("default", "cell-1").await.unwrap(), 1.0);
}

#[tokio::test]
async fn extreme_demand_clamps_to_three() {
    let h = harness();
    h.service.process_snapshot(&snapshot("cell-1", 10, 10)).await.unwrap();
    h.service.process_snapshot(&snapshot("cell-1", 10, 10)).await.unwrap();

    let m = h.service.process_snapshot(&snapshot("cell-1", 1, 1000)).await.unwrap();
    assert_eq!(m, 3.0);
    assert_eq!(h.service.get("default", "cell-1").await.unwrap(), 3.0);
}

#[tokio::test]
async fn excess_supply_clamps_to_the_floor() {
    let h = harness();
    let m = h.service.process_snapshot(&snapshot("cell-1", 50, 1)).await.unwrap();
    assert_eq!(m, 1.0);
}

#[tokio::test]
async fn disabled_flag_reads_one_even_with_a_hot_cache() {
    let h = harness();
    h.service.process_snapshot(&snapshot("cell-1", 1, 1000)).await.unwrap();
    assert_eq!(h.service.get("default", "cell-1").await.unwrap(), 3.0);

    h.flags
        .set("default", flags::SURGE_PRICING_ENABLED, false)
        .await
        .unwrap();
    assert_eq!(h.service.get("default", "cell-1").await.unwrap(), 1.0);

    // Other tenants are unaffected.
    assert_eq!(h.service.get("tenant-b", "cell-1").await.unwrap(), 3.0);
}

#[tokio::test]
async fn cache_miss_falls_back_to_the_audit_row_then_one() {
    let h = harness();
    h.cells
        .upsert(GeoCellRecord {
            cell_id: "cold-cell".to_string(),
            region_id: "ap-south-1".to_string(),
            tenant_id: "default".to_string(),
            active_drivers: 3,
            pending_rides: 9,
            surge_multiplier: 2.0,
            computed_at: Utc::now(),
        })
        .await
        .unwrap();

    // No cache entry for this cell; the audit row answers.
    assert_eq!(h.service.get("default", "cold-cell").await.unwrap(), 2.0);
    // Unknown cell: no surge.
    assert_eq!(h.service.get("default", "never-seen").await.unwrap(), 1.0);
}

#[tokio::test]
async fn recompute_overwrites_the_audit_row() {
    let h = harness();
    h.service.process_snapshot(&snapshot("cell-1", 10, 30)).await.unwrap();
    let first = h.cells.get("cell-1").await.unwrap().unwrap();

    h.service.process_snapshot(&snapshot("cell-1", 10, 10)).await.unwrap();
    let second = h.cells.get("cell-1").await.unwrap().unwrap();

    assert_eq!(second.pending_rides, 10);
    assert!(second.computed_at >= first.computed_at);
}

#[tokio::test]
async fn fresh_recompute_updates_the_cache() {
    let h = harness();
    h.service.process_snapshot(&snapshot("cell-1", 10, 30)).await.unwrap();
    let spiked = h.window.cached_multiplier("cell-1").await.unwrap().unwrap();
    assert!(spiked > 1.0);

    // Demand cools off; the weighted window pulls the multiplier down.
    let mut last = spiked;
    for _ in 0..5 {
        last = h.service.process_snapshot(&snapshot("cell-1", 10, 10)).await.unwrap();
    }
    assert!(last < spiked);
    assert_eq!(
        h.window.cached_multiplier("cell-1").await.unwrap(),
        Some(last)
    );
}

#[tokio::test]
async fn cells_do_not_cross_pollinate() {
    let h = harness();
    h.service.process_snapshot(&snapshot("hot", 1, 100)).await.unwrap();
    h.service.process_snapshot(&snapshot("calm", 10, 10)).await.unwrap();

    assert_eq!(h.service.get("default", "hot").await.unwrap(), 3.0);
    assert_eq!(h.service.get("default", "calm").await.unwrap(), 1.0);
}
