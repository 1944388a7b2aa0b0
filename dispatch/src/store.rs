//! Persistence contract for rides and driver offers.
//!
//! The engine talks to storage through this trait so the same logic runs
//! against Postgres in production and the in-memory store in tests. Methods
//! that mutate a ride take the caller's pre-read `version`; a stale version
//! yields [`StoreError::VersionConflict`], which is the accept-race signal.

use crate::model::{DriverOffer, NewRide, Ride};
use async_trait::async_trait;
use rideflow_core::types::OfferId;
use rideflow_core::{OfferResponse, RideId, RideStatus};
use thiserror::Error;

/// Errors from the dispatch store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The ride does not exist.
    #[error("ride {0} not found")]
    RideNotFound(RideId),

    /// The row's version no longer matches the caller's pre-read version.
    #[error("version conflict on ride {0}")]
    VersionConflict(RideId),

    /// Another row already holds this idempotency key.
    #[error("idempotency key already in use")]
    DuplicateIdempotencyKey,

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Ride + offer persistence.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Insert a new ride at PENDING with `attempt_count = 0`, `version = 0`.
    ///
    /// A concurrent insert with the same idempotency key loses with
    /// [`StoreError::DuplicateIdempotencyKey`].
    async fn insert_ride(&self, new: NewRide) -> Result<Ride, StoreError>;

    /// Look up a ride by tenant and idempotency key.
    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<Ride>, StoreError>;

    /// Read one ride.
    async fn fetch_ride(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError>;

    /// Atomically move the ride to DISPATCHING, bump the attempt count, and
    /// append the offer row — one transaction, guarded by `expected_version`.
    async fn record_offer(
        &self,
        ride_id: RideId,
        expected_version: i64,
        driver_id: &str,
        attempt_number: i32,
        ttl_seconds: i64,
    ) -> Result<(Ride, DriverOffer), StoreError>;

    /// Version-guarded status transition, optionally assigning the driver.
    async fn transition(
        &self,
        ride_id: RideId,
        expected_version: i64,
        status: RideStatus,
        assigned_driver_id: Option<&str>,
    ) -> Result<Ride, StoreError>;

    /// The open (unanswered) offer for this ride and driver, if any.
    async fn open_offer(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<Option<DriverOffer>, StoreError>;

    /// Record the offer's terminal response. A second write to an already
    /// answered offer is a no-op: the audit row is mutated at most once.
    async fn respond_offer(
        &self,
        offer_id: OfferId,
        response: OfferResponse,
    ) -> Result<(), StoreError>;

    /// Every driver ever offered this ride, for re-dispatch exclusion.
    async fn offered_driver_ids(&self, ride_id: RideId) -> Result<Vec<String>, StoreError>;

    /// All rides currently in DISPATCHING, for the timeout sweep.
    async fn dispatching_rides(&self) -> Result<Vec<Ride>, StoreError>;

    /// Open offers for one ride, newest attempt first.
    async fn open_offers(&self, ride_id: RideId) -> Result<Vec<DriverOffer>, StoreError>;
}
