//! Postgres-backed geo-cell audit store.

use crate::store::{GeoCellRecord, SurgeCellStore, SurgeCellStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Postgres-backed [`SurgeCellStore`].
#[derive(Clone)]
pub struct PostgresSurgeCellStore {
    pool: PgPool,
}

impl PostgresSurgeCellStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct GeoCellRow {
    cell_id: String,
    region_id: String,
    tenant_id: String,
    active_drivers: i32,
    pending_rides: i32,
    surge_multiplier: f64,
    computed_at: DateTime<Utc>,
}

impl From<GeoCellRow> for GeoCellRecord {
    fn from(row: GeoCellRow) -> Self {
        Self {
            cell_id: row.cell_id,
            region_id: row.region_id,
            tenant_id: row.tenant_id,
            active_drivers: row.active_drivers,
            pending_rides: row.pending_rides,
            surge_multiplier: row.surge_multiplier,
            computed_at: row.computed_at,
        }
    }
}

fn storage_err(e: sqlx::Error) -> SurgeCellStoreError {
    SurgeCellStoreError::Storage(e.to_string())
}

#[async_trait]
impl SurgeCellStore for PostgresSurgeCellStore {
    async fn upsert(&self, record: GeoCellRecord) -> Result<(), SurgeCellStoreError> {
        sqlx::query(
            "INSERT INTO geo_cells (cell_id, region_id, tenant_id, active_drivers, \
             pending_rides, surge_multiplier, computed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (cell_id) DO UPDATE SET \
             region_id = EXCLUDED.region_id, tenant_id = EXCLUDED.tenant_id, \
             active_drivers = EXCLUDED.active_drivers, pending_rides = EXCLUDED.pending_rides, \
             surge_multiplier = EXCLUDED.surge_multiplier, computed_at = EXCLUDED.computed_at",
        )
        .bind(&record.cell_id)
        .bind(&record.region_id)
        .bind(&record.tenant_id)
        .bind(record.active_drivers)
        .bind(record.pending_rides)
        .bind(record.surge_multiplier)
        .bind(record.computed_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, cell_id: &str) -> Result<Option<GeoCellRecord>, SurgeCellStoreError> {
        let row: Option<GeoCellRow> = sqlx::query_as(
            "SELECT cell_id, region_id, tenant_id, active_drivers, pending_rides, \
             surge_multiplier, computed_at FROM geo_cells WHERE cell_id = $1",
        )
        .bind(cell_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.map(GeoCellRecord::from))
    }
}
