//! Geo-cell audit row persistence.
//!
//! One row per cell, overwritten on every recompute; history lives on the
//! bus, not in SQL. The row is the cache-miss fallback for reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from the geo-cell store.
#[derive(Error, Debug)]
pub enum SurgeCellStoreError {
    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Audit snapshot of a cell's latest recompute.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoCellRecord {
    /// H3 cell address.
    pub cell_id: String,
    /// Region id.
    pub region_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Active drivers at recompute time.
    pub active_drivers: i32,
    /// Pending rides at recompute time.
    pub pending_rides: i32,
    /// Clamped multiplier.
    pub surge_multiplier: f64,
    /// Recompute instant.
    pub computed_at: DateTime<Utc>,
}

/// Per-cell audit row store.
#[async_trait]
pub trait SurgeCellStore: Send + Sync {
    /// Insert or overwrite the cell's row.
    async fn upsert(&self, record: GeoCellRecord) -> Result<(), SurgeCellStoreError>;

    /// Read the cell's latest row.
    async fn get(&self, cell_id: &str) -> Result<Option<GeoCellRecord>, SurgeCellStoreError>;
}
