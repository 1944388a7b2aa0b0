//! Postgres-backed dispatch store.
//!
//! Every mutating ride update is guarded by the row's `version` column: the
//! UPDATE's WHERE clause carries the caller's pre-read version, and zero
//! affected rows is the conflict signal. `record_offer` spans the ride
//! update and the offer insert in one transaction.

use crate::model::{DriverOffer, NewRide, Ride};
use crate::store::{DispatchStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rideflow_core::types::OfferId;
use rideflow_core::{OfferResponse, RideId, RideStatus, VehicleTier};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed [`DispatchStore`].
#[derive(Clone)]
pub struct PostgresDispatchStore {
    pool: PgPool,
}

impl PostgresDispatchStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RideRow {
    id: Uuid,
    rider_id: String,
    tenant_id: String,
    region_id: String,
    pickup_lat: f64,
    pickup_lng: f64,
    destination_lat: f64,
    destination_lng: f64,
    tier: String,
    payment_method: String,
    status: String,
    idempotency_key: Option<String>,
    request_hash: Option<String>,
    assigned_driver_id: Option<String>,
    attempt_count: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = StoreError;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RideId::from_uuid(row.id),
            rider_id: row.rider_id,
            tenant_id: row.tenant_id,
            region_id: row.region_id,
            pickup_lat: row.pickup_lat,
            pickup_lng: row.pickup_lng,
            destination_lat: row.destination_lat,
            destination_lng: row.destination_lng,
            tier: VehicleTier::from_str(&row.tier).map_err(StoreError::Storage)?,
            payment_method: row.payment_method,
            status: RideStatus::from_str(&row.status).map_err(StoreError::Storage)?,
            idempotency_key: row.idempotency_key,
            request_hash: row.request_hash,
            assigned_driver_id: row.assigned_driver_id,
            attempt_count: row.attempt_count,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OfferRow {
    id: Uuid,
    ride_id: Uuid,
    driver_id: String,
    attempt_number: i32,
    offered_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    ttl_seconds: i64,
    response: Option<String>,
}

impl TryFrom<OfferRow> for DriverOffer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        let response = row
            .response
            .as_deref()
            .map(OfferResponse::from_str)
            .transpose()
            .map_err(StoreError::Storage)?;
        Ok(Self {
            id: OfferId::from_uuid(row.id),
            ride_id: RideId::from_uuid(row.ride_id),
            driver_id: row.driver_id,
            attempt_number: row.attempt_number,
            offered_at: row.offered_at,
            responded_at: row.responded_at,
            ttl_seconds: row.ttl_seconds,
            response,
        })
    }
}

const RIDE_COLUMNS: &str = "id, rider_id, tenant_id, region_id, pickup_lat, pickup_lng, \
     destination_lat, destination_lng, tier, payment_method, status, idempotency_key, \
     request_hash, assigned_driver_id, attempt_count, version, created_at, updated_at";

const OFFER_COLUMNS: &str =
    "id, ride_id, driver_id, attempt_number, offered_at, responded_at, ttl_seconds, response";

fn storage_err(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

#[async_trait]
impl DispatchStore for PostgresDispatchStore {
    async fn insert_ride(&self, new: NewRide) -> Result<Ride, StoreError> {
        let now = Utc::now();
        let ride = Ride {
            id: RideId::new(),
            rider_id: new.rider_id,
            tenant_id: new.tenant_id,
            region_id: new.region_id,
            pickup_lat: new.pickup_lat,
            pickup_lng: new.pickup_lng,
            destination_lat: new.destination_lat,
            destination_lng: new.destination_lng,
            tier: new.tier,
            payment_method: new.payment_method,
            status: RideStatus::Pending,
            idempotency_key: new.idempotency_key,
            request_hash: new.request_hash,
            assigned_driver_id: None,
            attempt_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            "INSERT INTO rides (id, rider_id, tenant_id, region_id, pickup_lat, pickup_lng, \
             destination_lat, destination_lng, tier, payment_method, status, idempotency_key, \
             request_hash, assigned_driver_id, attempt_count, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(ride.id.as_uuid())
        .bind(&ride.rider_id)
        .bind(&ride.tenant_id)
        .bind(&ride.region_id)
        .bind(ride.pickup_lat)
        .bind(ride.pickup_lng)
        .bind(ride.destination_lat)
        .bind(ride.destination_lng)
        .bind(ride.tier.as_str())
        .bind(&ride.payment_method)
        .bind(ride.status.as_str())
        .bind(&ride.idempotency_key)
        .bind(&ride.request_hash)
        .bind(&ride.assigned_driver_id)
        .bind(ride.attempt_count)
        .bind(ride.version)
        .bind(ride.created_at)
        .bind(ride.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(ride),
            Err(e) => {
                if let Some(db_err) = e.as_database_error() {
                    if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                        return Err(StoreError::DuplicateIdempotencyKey);
                    }
                }
                Err(storage_err(e))
            }
        }
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<Ride>, StoreError> {
        let row: Option<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides WHERE tenant_id = $1 AND idempotency_key = $2"
        ))
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(Ride::try_from).transpose()
    }

    async fn fetch_ride(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError> {
        let row: Option<RideRow> =
            sqlx::query_as(&format!("SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1"))
                .bind(ride_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        row.map(Ride::try_from).transpose()
    }

    async fn record_offer(
        &self,
        ride_id: RideId,
        expected_version: i64,
        driver_id: &str,
        attempt_number: i32,
        ttl_seconds: i64,
    ) -> Result<(Ride, DriverOffer), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let updated: Option<RideRow> = sqlx::query_as(&format!(
            "UPDATE rides SET status = $3, attempt_count = $4, version = version + 1, \
             updated_at = now() WHERE id = $1 AND version = $2 RETURNING {RIDE_COLUMNS}"
        ))
        .bind(ride_id.as_uuid())
        .bind(expected_version)
        .bind(RideStatus::Dispatching.as_str())
        .bind(attempt_number)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(updated) = updated else {
            return Err(self.conflict_or_missing(ride_id).await?);
        };

        let offer = DriverOffer {
            id: OfferId::new(),
            ride_id,
            driver_id: driver_id.to_string(),
            attempt_number,
            offered_at: Utc::now(),
            responded_at: None,
            ttl_seconds,
            response: None,
        };

        sqlx::query(
            "INSERT INTO driver_offers (id, ride_id, driver_id, attempt_number, offered_at, \
             responded_at, ttl_seconds, response) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(offer.id.as_uuid())
        .bind(offer.ride_id.as_uuid())
        .bind(&offer.driver_id)
        .bind(offer.attempt_number)
        .bind(offer.offered_at)
        .bind(offer.responded_at)
        .bind(offer.ttl_seconds)
        .bind(offer.response.map(|r| r.as_str()))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok((Ride::try_from(updated)?, offer))
    }

    async fn transition(
        &self,
        ride_id: RideId,
        expected_version: i64,
        status: RideStatus,
        assigned_driver_id: Option<&str>,
    ) -> Result<Ride, StoreError> {
        let updated: Option<RideRow> = sqlx::query_as(&format!(
            "UPDATE rides SET status = $3, assigned_driver_id = $4, version = version + 1, \
             updated_at = now() WHERE id = $1 AND version = $2 RETURNING {RIDE_COLUMNS}"
        ))
        .bind(ride_id.as_uuid())
        .bind(expected_version)
        .bind(status.as_str())
        .bind(assigned_driver_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match updated {
            Some(row) => Ride::try_from(row),
            None => Err(self.conflict_or_missing(ride_id).await?),
        }
    }

    async fn open_offer(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<Option<DriverOffer>, StoreError> {
        let row: Option<OfferRow> = sqlx::query_as(&format!(
            "SELECT {OFFER_COLUMNS} FROM driver_offers \
             WHERE ride_id = $1 AND driver_id = $2 AND response IS NULL \
             ORDER BY attempt_number DESC LIMIT 1"
        ))
        .bind(ride_id.as_uuid())
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(DriverOffer::try_from).transpose()
    }

    async fn respond_offer(
        &self,
        offer_id: OfferId,
        response: OfferResponse,
    ) -> Result<(), StoreError> {
        // `response IS NULL` keeps the audit row write-once.
        sqlx::query(
            "UPDATE driver_offers SET response = $2, responded_at = now() \
             WHERE id = $1 AND response IS NULL",
        )
        .bind(offer_id.as_uuid())
        .bind(response.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn offered_driver_ids(&self, ride_id: RideId) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT DISTINCT driver_id FROM driver_offers WHERE ride_id = $1")
            .bind(ride_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn dispatching_rides(&self) -> Result<Vec<Ride>, StoreError> {
        let rows: Vec<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(RideStatus::Dispatching.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter().map(Ride::try_from).collect()
    }

    async fn open_offers(&self, ride_id: RideId) -> Result<Vec<DriverOffer>, StoreError> {
        let rows: Vec<OfferRow> = sqlx::query_as(&format!(
            "SELECT {OFFER_COLUMNS} FROM driver_offers \
             WHERE ride_id = $1 AND response IS NULL ORDER BY attempt_number DESC"
        ))
        .bind(ride_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter().map(DriverOffer::try_from).collect()
    }
}

impl PostgresDispatchStore {
    /// Distinguishes a stale version from a missing row after a zero-row
    /// guarded UPDATE.
    async fn conflict_or_missing(&self, ride_id: RideId) -> Result<StoreError, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rides WHERE id = $1)")
            .bind(ride_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(if exists {
            StoreError::VersionConflict(ride_id)
        } else {
            StoreError::RideNotFound(ride_id)
        })
    }
}
