//! Multiplier math and the surge service.
//!
//! The window algorithm smooths a single-snapshot spike while reacting to
//! sustained demand:
//!
//! 1. entries survive a 5-minute sliding window, oldest rank 1, newest rank N
//! 2. `weighted_ratio = (Σ rank_i · rides_i/max(drivers_i, 1)) / (N·(N+1)/2)`
//! 3. `raw = 1.0 + (weighted_ratio − 1.0) · 0.5`
//! 4. `multiplier = clamp(raw, 1.0, 3.0)`
//!
//! The clamp is the only place the 1.0 floor is enforced; intermediate
//! values may sit below it.

use crate::store::{GeoCellRecord, SurgeCellStore, SurgeCellStoreError};
use chrono::Utc;
use rideflow_core::events::SupplyDemandSnapshotEvent;
use rideflow_kv::{flags, FeatureFlagStore, KvError, SurgeWindowStore, WindowEntry};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Fraction of the demand-ratio excess applied to the multiplier.
pub const SURGE_FACTOR: f64 = 0.5;

/// Multiplier ceiling.
pub const MAX_SURGE: f64 = 3.0;

/// Sliding window length.
pub const WINDOW: Duration = Duration::from_secs(300);

/// Multiplier cache TTL; matches the snapshot cadence.
pub const CACHE_TTL: Duration = Duration::from_secs(10);

/// Errors from surge processing.
#[derive(Error, Debug)]
pub enum SurgeError {
    /// KV window/cache failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Audit row failure.
    #[error(transparent)]
    Store(#[from] SurgeCellStoreError),
}

/// Demand ratio of a single snapshot, drivers floored to 1.
fn demand_ratio(drivers: u32, rides: u32) -> f64 {
    f64::from(rides) / f64::from(drivers.max(1))
}

/// Raw single-snapshot multiplier, unclamped.
#[must_use]
pub fn instant_multiplier(active_drivers: u32, pending_rides: u32) -> f64 {
    1.0 + (demand_ratio(active_drivers, pending_rides) - 1.0) * SURGE_FACTOR
}

/// Clamp a raw multiplier into `[1.0, MAX_SURGE]`.
#[must_use]
pub fn clamp_multiplier(raw: f64) -> f64 {
    raw.clamp(1.0, MAX_SURGE)
}

/// Recency-weighted multiplier over the window, clamped.
///
/// An empty window (first snapshot for a cell) falls back to the
/// instant-only formula on the current counts.
#[must_use]
pub fn windowed_multiplier(
    entries: &[WindowEntry],
    current_drivers: u32,
    current_rides: u32,
) -> f64 {
    if entries.is_empty() {
        return clamp_multiplier(instant_multiplier(current_drivers, current_rides));
    }

    let total = entries.len();
    let weight_sum = (total * (total + 1) / 2) as f64;

    let weighted_ratio: f64 = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| demand_ratio(entry.drivers, entry.rides) * (i + 1) as f64)
        .sum::<f64>()
        / weight_sum;

    clamp_multiplier(1.0 + (weighted_ratio - 1.0) * SURGE_FACTOR)
}

/// The surge calculator service.
pub struct SurgeService {
    window: Arc<dyn SurgeWindowStore>,
    cells: Arc<dyn SurgeCellStore>,
    flags: Arc<dyn FeatureFlagStore>,
}

impl SurgeService {
    /// Wires the service to its stores.
    #[must_use]
    pub fn new(
        window: Arc<dyn SurgeWindowStore>,
        cells: Arc<dyn SurgeCellStore>,
        flags: Arc<dyn FeatureFlagStore>,
    ) -> Self {
        Self {
            window,
            cells,
            flags,
        }
    }

    /// Fold one snapshot into the cell's window and publish the recomputed
    /// multiplier to the cache and the audit row.
    ///
    /// # Errors
    ///
    /// KV and audit-store failures.
    pub async fn process_snapshot(
        &self,
        event: &SupplyDemandSnapshotEvent,
    ) -> Result<f64, SurgeError> {
        let now = Utc::now();
        let entries = self
            .window
            .record_snapshot(
                &event.geo_cell,
                event.active_drivers,
                event.pending_rides,
                now.timestamp_millis(),
                WINDOW,
            )
            .await?;

        let multiplier = windowed_multiplier(&entries, event.active_drivers, event.pending_rides);

        self.window
            .cache_multiplier(&event.geo_cell, multiplier, CACHE_TTL)
            .await?;

        self.cells
            .upsert(GeoCellRecord {
                cell_id: event.geo_cell.clone(),
                region_id: event.region_id.clone(),
                tenant_id: event.tenant_id.clone(),
                active_drivers: event.active_drivers as i32,
                pending_rides: event.pending_rides as i32,
                surge_multiplier: multiplier,
                computed_at: now,
            })
            .await?;

        metrics::gauge!("surge.multiplier", "cell" => event.geo_cell.clone()).set(multiplier);
        tracing::info!(
            cell = %event.geo_cell,
            region = %event.region_id,
            drivers = event.active_drivers,
            rides = event.pending_rides,
            window_entries = entries.len(),
            multiplier,
            "surge recomputed"
        );

        Ok(multiplier)
    }

    /// Current multiplier for a cell: flag gate, then cache, then audit row,
    /// then 1.0.
    ///
    /// # Errors
    ///
    /// KV and audit-store failures.
    pub async fn get(&self, tenant_id: &str, cell_id: &str) -> Result<f64, SurgeError> {
        if !self
            .flags
            .is_enabled(tenant_id, flags::SURGE_PRICING_ENABLED, true)
            .await
        {
            tracing::debug!(cell = %cell_id, tenant = %tenant_id, "surge pricing disabled by flag");
            metrics::counter!("surge.flag_disabled_reads").increment(1);
            return Ok(1.0);
        }

        if let Some(cached) = self.window.cached_multiplier(cell_id).await? {
            return Ok(cached);
        }

        Ok(self
            .cells
            .get(cell_id)
            .await?
            .map_or(1.0, |record| record.surge_multiplier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64, drivers: u32, rides: u32) -> WindowEntry {
        WindowEntry {
            timestamp_ms: ts,
            drivers,
            rides,
        }
    }

    #[test]
    fn balanced_supply_and_demand_is_exactly_one() {
        assert_eq!(instant_multiplier(10, 10), 1.0);
    }

    #[test]
    fn double_demand_raises_half() {
        assert_eq!(instant_multiplier(10, 20), 1.5);
    }

    #[test]
    fn no_demand_goes_below_one_before_clamping() {
        assert_eq!(instant_multiplier(10, 0), 0.5);
        assert!(instant_multiplier(10, 2) < 1.0);
    }

    #[test]
    fn zero_drivers_are_floored_not_divided() {
        assert!(instant_multiplier(0, 5).is_finite());
        // drivers floored to 1: ratio equals the ride count.
        assert_eq!(instant_multiplier(0, 5), instant_multiplier(1, 5));
    }

    #[test]
    fn empty_window_falls_back_to_instant_then_clamps() {
        assert_eq!(windowed_multiplier(&[], 10, 0), 1.0);
        assert_eq!(windowed_multiplier(&[], 10, 10), 1.0);
        assert_eq!(windowed_multiplier(&[], 1, 100), 3.0);
    }

    #[test]
    fn uniform_balanced_window_stays_at_one() {
        let window = vec![entry(1, 10, 10), entry(2, 10, 10), entry(3, 10, 10)];
        assert_eq!(windowed_multiplier(&window, 10, 10), 1.0);
    }

    #[test]
    fn extreme_recent_demand_clamps_to_max() {
        let window = vec![entry(1, 10, 10), entry(2, 10, 10), entry(3, 1, 1000)];
        assert_eq!(windowed_multiplier(&window, 1, 1000), 3.0);
    }

    #[test]
    fn excess_supply_clamps_to_floor() {
        let window = vec![entry(1, 100, 1), entry(2, 100, 1)];
        assert_eq!(windowed_multiplier(&window, 100, 1), 1.0);
    }

    #[test]
    fn newer_entries_weigh_more_than_older_ones() {
        // Old spike fading out vs fresh spike ramping in, same raw numbers.
        let fading = vec![entry(1, 1, 10), entry(2, 10, 10), entry(3, 10, 10)];
        let ramping = vec![entry(1, 10, 10), entry(2, 10, 10), entry(3, 1, 10)];
        assert!(windowed_multiplier(&ramping, 1, 10) > windowed_multiplier(&fading, 10, 10));
    }

    #[test]
    fn triangular_weighting_matches_hand_computation() {
        // ranks 1..3, weight_sum 6; ratios 1.0, 2.0, 3.0
        // weighted = (1·1 + 2·2 + 3·3) / 6 = 14/6
        // raw = 1 + (14/6 − 1)·0.5 = 5/3
        let window = vec![entry(1, 10, 10), entry(2, 10, 20), entry(3, 10, 30)];
        let got = windowed_multiplier(&window, 10, 30);
        assert!((got - 5.0 / 3.0).abs() < 1e-12, "got {got}");
    }
}
